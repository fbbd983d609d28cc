use anyhow::Result;
use medicine_rag::{Config, RagLibrary};
use std::path::PathBuf;

const USAGE: &str = "usage: medicine_rag ingest [CSV_PATH]\n       medicine_rag query <TEXT...>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    match command.as_str() {
        "ingest" => {
            let config = Config::from_env()?;
            let library = RagLibrary::new(&config)?;
            let path = args
                .get(1)
                .map(PathBuf::from)
                .unwrap_or_else(|| config.dataset_path.clone());
            let report = library.ingest_service.generate_embeddings(&path).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "query" if args.len() > 1 => {
            let config = Config::from_env()?;
            let library = RagLibrary::new(&config)?;
            let text = args[1..].join(" ");
            let response = library.query_service.query(&text).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}
