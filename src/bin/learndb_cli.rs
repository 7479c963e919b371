//! Debug CLI for poking the storage engine.
//!
//! Usage:
//!   learndb_cli <db_path> init
//!   learndb_cli <db_path> put <key> <text>
//!   learndb_cli <db_path> get <key>
//!   learndb_cli <db_path> delete <key>
//!   learndb_cli <db_path> scan
//!   learndb_cli <db_path> tables
//!   learndb_cli <db_path> stats
//!   learndb_cli <db_path> check
//!   learndb_cli <db_path> bulk-insert <count>
//!
//! Commands other than `init` expect the scratch table to exist.
//! Run with RUST_LOG=debug to watch splits and page recycling.

use std::env;
use std::process::exit;

use learndb::{Column, DataType, Db, Schema, StorageError, Value};

const TABLE: &str = "scratch";

fn scratch_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Integer).primary(),
        Column::new("body", DataType::Text).not_null(),
    ])
    .expect("scratch schema is well-formed")
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: learndb_cli <db_path> <command> [args...]");
        eprintln!("Commands:");
        eprintln!("  init                - create the scratch table");
        eprintln!("  put <key> <text>    - insert a row (replaces an existing key)");
        eprintln!("  get <key>           - fetch a row");
        eprintln!("  delete <key>        - delete a row");
        eprintln!("  scan                - list all rows in key order");
        eprintln!("  tables              - list catalog entries");
        eprintln!("  stats               - page and table counts");
        eprintln!("  check               - validate every tree and page accounting");
        eprintln!("  bulk-insert <count> - insert count test rows");
        exit(1);
    }

    let db = match Db::open(&args[1]) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: failed to open database: {}", e);
            exit(1);
        }
    };

    let result = run(&db, &args[2], &args[3..]);
    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        exit(1);
    }
    if let Err(e) = db.close() {
        eprintln!("ERROR: close failed: {}", e);
        exit(1);
    }
}

fn run(db: &Db, command: &str, args: &[String]) -> learndb::Result<()> {
    match command {
        "init" => {
            db.create_table(
                TABLE,
                scratch_schema(),
                "create table scratch (id integer primary key, body text not null)",
            )?;
            println!("OK");
        }

        "put" => {
            let (key, body) = match args {
                [key, body] => (parse_key(key), body),
                _ => usage("put <key> <text>"),
            };
            // Replace semantics live here, not in the engine: an
            // existing key is deleted first.
            match db.delete(TABLE, key) {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            db.insert(TABLE, &[Value::Integer(key), Value::from(body.as_str())])?;
            println!("OK");
        }

        "get" => {
            let key = match args {
                [key] => parse_key(key),
                _ => usage("get <key>"),
            };
            match db.get(TABLE, key)? {
                Some(row) => println!("{}", row[1]),
                None => println!("NOT_FOUND"),
            }
        }

        "delete" => {
            let key = match args {
                [key] => parse_key(key),
                _ => usage("delete <key>"),
            };
            match db.delete(TABLE, key) {
                Ok(()) => println!("DELETED"),
                Err(StorageError::NotFound(_)) => println!("NOT_FOUND"),
                Err(e) => return Err(e),
            }
        }

        "scan" => {
            for (key, row) in db.scan(TABLE)? {
                println!("{}\t{}", key, row[1]);
            }
        }

        "tables" => {
            for table in db.tables()? {
                println!(
                    "{}\troot page {}\t{} columns",
                    table.name,
                    table.root_page,
                    table.schema.len()
                );
            }
        }

        "stats" => {
            let stats = db.stats()?;
            println!("pages:      {}", stats.num_pages);
            println!("free pages: {}", stats.free_pages);
            println!("tables:     {}", stats.tables);
        }

        "check" => {
            db.validate_all()?;
            println!("OK");
        }

        "bulk-insert" => {
            let count = match args {
                [count] => parse_key(count),
                _ => usage("bulk-insert <count>"),
            };
            for key in 0..count {
                db.insert(
                    TABLE,
                    &[
                        Value::Integer(key),
                        Value::Text(format!("bulk row number {key}")),
                    ],
                )?;
            }
            println!("OK ({count} rows)");
        }

        other => {
            eprintln!("ERROR: unknown command {:?}", other);
            exit(1);
        }
    }
    Ok(())
}

fn parse_key(s: &str) -> i32 {
    match s.parse() {
        Ok(k) => k,
        Err(_) => {
            eprintln!("ERROR: {:?} is not an integer key", s);
            exit(1);
        }
    }
}

fn usage(msg: &str) -> ! {
    eprintln!("Usage: learndb_cli <db_path> {}", msg);
    exit(1)
}
