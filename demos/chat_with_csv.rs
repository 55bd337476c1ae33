use chrono::Utc;
use dotenv::dotenv;
use futures::StreamExt;
use retail_signals::llm::{handle_chat_request, ChatClient, ChatRequest};
use retail_signals::tables::{extract_tables, strip_trailer, trailer_provider};
use retail_signals::{
    parse_csv_file, resolve_prompt_context, ContextOptions, IngestOptions, MetricCache,
};
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        return Err("usage: chat_with_csv <file.csv>...".into());
    }

    let options = IngestOptions::default();
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        files.push(parse_csv_file(path, &options)?);
    }

    let cache = MetricCache::new();
    let context = resolve_prompt_context(&files, &ContextOptions::default(), &cache, Utc::now());
    let summary = context.to_value()?;
    println!("✅ Loaded {} files ({} context).", files.len(), context.kind());

    let client = ChatClient::from_env();
    println!("🤖 Provider: {}. Ask questions (type 'quit' to exit).", client.provider().name());
    println!("------------------------------------------------------------------");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let question = input.trim();

        if question.eq_ignore_ascii_case("quit") || question.eq_ignore_ascii_case("exit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        let request = ChatRequest::new(question, summary.clone());
        let mut stream = match handle_chat_request(&client, &request).await {
            Ok(stream) => stream,
            Err(e) => {
                eprintln!("❌ Error: {}", e);
                continue;
            }
        };

        let mut answer = String::new();
        while let Some(chunk) = stream.next().await {
            print!("{}", strip_trailer(&chunk));
            io::stdout().flush()?;
            answer.push_str(&chunk);
        }
        println!();

        let tables = extract_tables(strip_trailer(&answer));
        if !tables.is_empty() {
            println!("\n📊 {} table(s) in the answer:", tables.len());
            for table in &tables {
                println!("   {} ({} rows)", table.headers.join(" | "), table.rows.len());
            }
        }
        if let Some(provider) = trailer_provider(&answer) {
            println!("(answered by {})", provider);
        }
        println!("------------------------------------------------------------------");
    }

    Ok(())
}
