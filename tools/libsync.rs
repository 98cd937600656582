mod config;

use std::env;
use std::path::Path;

use library::{BatchReport, Library, RefreshHint, Scanner};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{config_path_from_env, load_or_create_config, resolve_path};

const USAGE: &str = "usage: libsync <command> [args]

commands:
  add <dir>                   register a directory and import its music
  rescan <dir> [--new-only]   re-read tags under a library directory
  rescan-all [--new-only]     rescan every library root
  remove <dir> [--keep-root]  drop tracked files under a directory
  remove-file <path>...       drop individual files
  roots                       list library roots
  tracks [--json]             list tracked files
  stats                       row counts
  reset-tags                  drop all tag data, keep roots
  clear                       drop all tag data and roots";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let command = match args.next() {
        Some(command) => command,
        None => {
            println!("{}", USAGE);
            return Ok(());
        }
    };
    let rest: Vec<String> = args.collect();
    let (flags, operands): (Vec<&String>, Vec<&String>) =
        rest.iter().partition(|arg| arg.starts_with("--"));
    let has_flag = |name: &str| flags.iter().any(|flag| flag.as_str() == name);

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Wrote default config to {:?}", config_path);
    }
    let db_path = resolve_path(&config_path, &config.library.database_path);
    let scanner = Scanner::new(&config.library.music_extensions);
    let library = Library::open(&db_path, scanner)?;
    let prune = config.scan.prune_on_remove;

    match command.as_str() {
        "add" => {
            let dir = single_operand(&operands, "add <dir>")?;
            print_report(&library.add_directory(Path::new(dir))?);
        }
        "rescan" => {
            let dir = single_operand(&operands, "rescan <dir>")?;
            print_report(&library.rescan(Path::new(dir), !has_flag("--new-only"))?);
        }
        "rescan-all" => {
            print_report(&library.rescan_all(!has_flag("--new-only"))?);
        }
        "remove" => {
            let dir = single_operand(&operands, "remove <dir>")?;
            let removed =
                library.remove_directory_files(Path::new(dir), !has_flag("--keep-root"), prune)?;
            println!("Removed {} files", removed);
        }
        "remove-file" => {
            if operands.is_empty() {
                return Err("remove-file needs at least one path".into());
            }
            let removed = library.remove_files(&operands, prune, Some(RefreshHint::FilesRemoved))?;
            println!("Removed {} files", removed);
        }
        "roots" => {
            for root in library.roots().list()? {
                println!("{}", root);
            }
        }
        "tracks" => {
            let tracks = library.tracks()?;
            if has_flag("--json") {
                println!("{}", serde_json::to_string_pretty(&tracks)?);
            } else {
                for track in tracks {
                    println!(
                        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                        track.title,
                        track.artist.unwrap_or_default(),
                        track.album.unwrap_or_default(),
                        track.track.map(|n| n.to_string()).unwrap_or_default(),
                        track.length,
                        track.year.map(|y| y.to_string()).unwrap_or_default(),
                        track.genre.unwrap_or_default(),
                        track.path
                    );
                }
            }
        }
        "stats" => {
            let stats = library.stats()?;
            println!(
                "Library at {:?}: {} files, {} artists, {} albums, {} genres, {} album artists",
                library.store().path(),
                stats.files,
                stats.artists,
                stats.albums,
                stats.genres,
                stats.album_artists
            );
        }
        "reset-tags" => library.reset_library_tags()?,
        "clear" => library.clear_library()?,
        other => {
            return Err(format!("unknown command: {}\n\n{}", other, USAGE).into());
        }
    }

    Ok(())
}

fn single_operand<'a>(operands: &[&'a String], usage: &str) -> Result<&'a str, String> {
    match operands {
        [only] => Ok(only.as_str()),
        _ => Err(format!("usage: libsync {}", usage)),
    }
}

fn print_report(report: &BatchReport) {
    for failed in &report.failed {
        warn!("Skipped {} ({:?}): {}", failed.path, failed.kind, failed.error);
    }
    println!(
        "Imported {} files, {} already tracked, {} failed",
        report.inserted,
        report.skipped.len(),
        report.failed.len()
    );
}
