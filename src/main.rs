use std::io::Write;

use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yaolist_storage::config;
use yaolist_storage::storage::{ChecksumAlgorithm, Driver, StorageManager, Visibility, WriteOptions};

const USAGE: &str = "\
Usage: yaolist-storage [--disk NAME] <command> [args]

Commands:
  ls [DIR] [-r]            list files and directories
  cat PATH                 print a file to stdout
  put PATH [SRC] [--private]
                           upload SRC (or stdin) to PATH
  rm PATH...               delete files
  mkdir PATH               create a directory
  stat PATH                size, mime type, modification time, visibility, checksum
  url PATH [--expires SECS]
                           public URL, or a temporary one
  disks                    list configured disks and driver types";

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yaolist_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("yaolist-storage {} (built {})", env!("CARGO_PKG_VERSION"), env!("BUILD_TIME"));
        return Ok(());
    }
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    let disk = take_option(&mut args, "--disk")?;

    // Load configuration / 加载配置
    let app_config = config::load_config().map_err(|e| anyhow!(e))?;
    let manager = StorageManager::with_builtin_drivers(app_config.clone());

    let command = args.remove(0);
    if command == "disks" {
        for (name, disk) in &app_config.disks {
            let marker = if *name == manager.default_driver() { "*" } else { " " };
            println!("{} {:<12} {:<8} {}", marker, name, disk.kind, disk.root);
        }
        println!("driver types: {}", manager.driver_types().join(", "));
        return Ok(());
    }

    let driver = manager.disk(disk.as_deref())?;
    run(&driver, &command, args)
}

fn run(driver: &Driver, command: &str, mut args: Vec<String>) -> Result<()> {
    match command {
        "ls" => {
            let recursive = take_flag(&mut args, "-r");
            let dir = args.first().map(String::as_str).unwrap_or("");
            for directory in driver.directories(dir, recursive)? {
                println!("{}/", directory);
            }
            for file in driver.files(dir, recursive)? {
                println!("{}", file);
            }
        }
        "cat" => {
            let path = required(&args, 0, "PATH")?;
            let mut stream = driver
                .read_stream(path)?
                .ok_or_else(|| anyhow!("Unable to read {}", path))?;
            let mut stdout = std::io::stdout().lock();
            std::io::copy(&mut stream, &mut stdout)?;
            stdout.flush()?;
        }
        "put" => {
            let private = take_flag(&mut args, "--private");
            let path = required(&args, 0, "PATH")?;
            let options = if private {
                WriteOptions::from(Visibility::Private)
            } else {
                WriteOptions::new()
            };
            let written = match args.get(1) {
                Some(src) => {
                    let mut file = std::fs::File::open(src).with_context(|| format!("open {}", src))?;
                    driver.write_stream(path, &mut file, options)?
                }
                None => driver.write_stream(path, &mut std::io::stdin().lock(), options)?,
            };
            if !written {
                bail!("Failed to write {}", path);
            }
        }
        "rm" => {
            if args.is_empty() {
                bail!("missing PATH\n\n{}", USAGE);
            }
            if !driver.delete(&args)? {
                bail!("Some paths could not be deleted");
            }
        }
        "mkdir" => {
            let path = required(&args, 0, "PATH")?;
            if !driver.make_directory(path)? {
                bail!("Failed to create {}", path);
            }
        }
        "stat" => {
            let path = required(&args, 0, "PATH")?;
            if driver.missing(path) {
                bail!("File not found: {}", path);
            }
            let show = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
            println!("path:          {}", driver.path(path));
            println!("size:          {}", show(driver.size(path)?.map(|s| s.to_string())));
            println!("mime type:     {}", show(driver.mime_type(path)?));
            println!("last modified: {}", show(driver.last_modified(path)?.map(|t| t.to_rfc3339())));
            println!("visibility:    {}", show(driver.get_visibility(path)?.map(|v| v.to_string())));
            println!("md5:           {}", show(driver.checksum(path, ChecksumAlgorithm::Md5)?));
        }
        "url" => {
            let expires = take_option(&mut args, "--expires")?;
            let path = required(&args, 0, "PATH")?;
            let url = match expires {
                Some(secs) => {
                    let secs: i64 = secs.parse().with_context(|| format!("invalid --expires {}", secs))?;
                    driver.temporary_url(path, chrono::Utc::now() + chrono::Duration::seconds(secs))?
                }
                None => driver.url(path)?,
            };
            println!("{}", url);
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
    Ok(())
}

fn required<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing {}\n\n{}", name, USAGE))
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{} needs a value", name);
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}
