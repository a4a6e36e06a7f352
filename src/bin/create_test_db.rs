use std::error::Error;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use rusqlite::Connection;
use time::{Duration, OffsetDateTime};

use family_ledger::{Currency, Transaction, create_transaction, initialize_db};

/// A utility for creating a test database for the family ledger server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to save the SQLite database to.
    #[arg(long, short)]
    output_path: String,
}

/// Create and populate a database for manual testing.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let output_path = Path::new(&args.output_path);

    match output_path.extension() {
        None => {
            eprintln!("Output path must include a file extension (e.g., 'ledger.db').");
            exit(1);
        }
        Some(extension) if extension.is_empty() => {
            eprintln!("Output path must include a file extension (e.g., 'ledger.db').");
            exit(1);
        }
        _ => {}
    }

    if output_path.is_file() {
        eprintln!("File already exists at {output_path:#?}!");
        exit(1);
    }

    println!("Creating database at {output_path:#?}");
    let conn = Connection::open(output_path)?;

    initialize_db(&conn)?;

    println!("Creating sample transactions...");

    let now = OffsetDateTime::now_utc();
    let samples = [
        ("1", "Alice", 200.0, Currency::CNY, "餐饮", "买菜", "买菜 200", 0),
        ("2", "Bob", 50.0, Currency::CNY, "交通", "出租车", "Taxi 50", 1),
        ("1", "Alice", 80.0, Currency::HKD, "交通", "打车去旺角", "打车去旺角 80", 3),
        ("2", "Bob", 45.0, Currency::HKD, "餐饮", "星巴克咖啡", "[Image Receipt]", 7),
        ("1", "Alice", 500.0, Currency::HKD, "餐饮", "午饭", "午饭 500 港币", 35),
    ];

    for (user_id, user_name, amount, currency, category, item, raw_text, days_ago) in samples {
        create_transaction(
            Transaction::build(user_id, user_name, amount, currency)
                .category(category)
                .item(item)
                .raw_text(raw_text)
                .created_at(Some(now - Duration::days(days_ago))),
            &conn,
        )?;
    }

    println!("Success!");

    Ok(())
}
