use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};

use cyan_server::client::{CyanClient, PostRequest};
use cyan_server::protocol::{Field, Response};

#[derive(Parser)]
#[command(name = "cyan-cli")]
#[command(about = "Send a single CYAN request and print the response", long_about = None)]
struct Cli {
    /// Edge tier address.
    #[arg(short, long, default_value = "127.0.0.1:12345")]
    addr: String,

    /// Protocol version to announce.
    #[arg(long, default_value = "0.1")]
    version: String,

    #[arg(short, long)]
    user: String,

    #[arg(short, long)]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a resource
    Get {
        resource: String,
    },
    /// Upload a payload
    Post {
        target: String,

        /// Body text. Ignored when --file is given.
        #[arg(long, default_value = "")]
        data: String,

        /// Read the body from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long = "type", default_value = "text")]
        content_type: String,

        #[arg(long, default_value = "none")]
        checksum: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut client = CyanClient::connect(&cli.addr).await?.with_version(cli.version);

    let response = match cli.command {
        Commands::Get { resource } => client.get(&cli.user, &resource, &cli.token).await?,
        Commands::Post {
            target,
            data,
            file,
            content_type,
            checksum,
        } => {
            let body = match file {
                Some(path) => tokio::fs::read(path).await?,
                None => data.into_bytes(),
            };
            let time_sent = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
            let request = PostRequest {
                user: &cli.user,
                token: &cli.token,
                target: &target,
                content_type: &content_type,
                checksum: &checksum,
                time_sent,
                body: &body,
            };
            client.post(&request).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&to_json(&response))?);
    Ok(())
}

fn to_json(response: &Response) -> Value {
    let mut fields = Map::new();
    fields.insert("RESP-TYPE".into(), json!(response.kind().as_str()));
    fields.insert("CODE".into(), json!(response.code()));
    for (key, field) in response.fields() {
        let value = match field {
            Field::Text(s) => json!(s),
            Field::Int(n) => json!(n),
            Field::Bytes(b) => json!(String::from_utf8_lossy(b)),
        };
        fields.insert(key.clone(), value);
    }
    Value::Object(fields)
}
