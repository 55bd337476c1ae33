use chrono::Utc;
use retail_signals::{
    build_prompt, build_prompt_preview, parse_csv_bytes, parse_csv_file, resolve_prompt_context,
    ContextOptions, IngestOptions, MetricCache, ParsedFile,
};
use std::error::Error;
use std::path::PathBuf;

const SAMPLE_SALES: &str = "date,sku,units,revenue
2024-01-28,TEE-RED,6,120
2024-01-29,TEE-RED,4,80
2024-01-30,TEE-RED,5,100
2024-01-29,HOODIE,2,90
";

const SAMPLE_INVENTORY: &str = "snapshot_date,sku,on_hand
2024-01-30,TEE-RED,50
2024-01-30,HOODIE,12
";

fn load_files(paths: &[PathBuf]) -> Result<Vec<ParsedFile>, Box<dyn Error>> {
    let options = IngestOptions::default();
    if paths.is_empty() {
        return Ok(vec![
            parse_csv_bytes("sales_daily.csv", SAMPLE_SALES.as_bytes(), &options)?,
            parse_csv_bytes("inventory_snapshot.csv", SAMPLE_INVENTORY.as_bytes(), &options)?,
        ]);
    }
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(parse_csv_file(path, &options)?);
    }
    Ok(files)
}

fn main() -> Result<(), Box<dyn Error>> {
    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    let files = load_files(&paths)?;

    for file in &files {
        println!("📄 {} ({} rows)", file.name, file.row_count);
        for warning in &file.warnings {
            println!("   ⚠️  {}", warning);
        }
    }

    let cache = MetricCache::new();
    let context = resolve_prompt_context(&files, &ContextOptions::default(), &cache, Utc::now());
    println!("\n🧮 Context kind: {}\n", context.kind());

    let value = context.to_value()?;
    println!("{}\n", serde_json::to_string_pretty(&value)?);

    let question = "Which SKUs are at risk of stocking out?";
    println!("------------------------------------------------------------------");
    println!("{}", build_prompt(question, &value));
    println!("------------------------------------------------------------------");
    println!("Preview: {}", build_prompt_preview(question, &value));

    Ok(())
}
