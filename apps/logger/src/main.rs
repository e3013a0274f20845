use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use heating_io::journal::{list_runs, read_records, recover_runtime, Record, RunInfo};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "heating-logger", about = "Inspect the heating controller's run logs")]
struct Args {
    /// Directory holding the run logs
    #[arg(short, long, default_value = "logs")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List runs, newest first
    List,
    /// Print every record of a run
    Show { run: String },
    /// Print the last records of the newest run
    Tail {
        #[arg(default_value_t = 20)]
        n: usize,
    },
    /// Runtime the next start would carry over
    Runtime,
}

fn find_run(dir: &Path, id: &str) -> Result<RunInfo> {
    let id = id.trim_end_matches(".log");
    match list_runs(dir)?.into_iter().find(|r| r.id == id) {
        Some(run) => Ok(run),
        None => bail!("no run {} in {}", id, dir.display()),
    }
}

fn print_header(out: &mut impl Write, run: &RunInfo) -> Result<()> {
    let modified: DateTime<Local> = run.modified.into();
    let written = modified.format("%a %d %b %H:%M:%S");
    writeln!(out, "===== {} (last written {}) =====", run.id, written)?;
    Ok(())
}

fn print_records(out: &mut impl Write, records: &[Record]) -> Result<()> {
    for r in records {
        let temperature = r.temperature.map_or("  -  ".to_string(), |t| format!("{:5.1}", t));
        let humidity = r.humidity.map_or("  -  ".to_string(), |h| format!("{:5.1}", h));
        writeln!(
            out,
            "{}  t={}  h={}  boiler {:.2}h",
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            temperature,
            humidity,
            r.runtime_hours
        )?;
    }
    Ok(())
}

fn run(args: Args, out: &mut impl Write) -> Result<()> {
    match args.command {
        Command::List => {
            let runs = list_runs(&args.dir)?;
            if runs.is_empty() {
                writeln!(out, "no runs in {}", args.dir.display())?;
            }
            for run in runs {
                let records = read_records(&run.path)?;
                let runtime = records.last().map_or(0.0, |r| r.runtime_hours);
                let modified: DateTime<Local> = run.modified.into();
                writeln!(
                    out,
                    "{}  {:6} records  {:8.2}h  (last written {})",
                    run.id,
                    records.len(),
                    runtime,
                    modified.format("%a %d %b %H:%M:%S")
                )?;
            }
        }
        Command::Show { run } => {
            let run = find_run(&args.dir, &run)?;
            print_header(out, &run)?;
            print_records(out, &read_records(&run.path)?)?;
        }
        Command::Tail { n } => {
            let Some(run) = list_runs(&args.dir)?.into_iter().next() else {
                bail!("no runs in {}", args.dir.display());
            };
            let records = read_records(&run.path)?;
            print_header(out, &run)?;
            print_records(out, &records[records.len().saturating_sub(n)..])?;
        }
        Command::Runtime => match recover_runtime(&args.dir) {
            Ok(hours) => writeln!(out, "{:.2}", hours)?,
            Err(e) => {
                tracing::warn!(error = %e, "nothing to recover");
                writeln!(out, "0.00")?;
            }
        },
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let stdout = std::io::stdout();
    run(args, &mut stdout.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "datetime\ttemperature\thumidity\tactivity(h)\n\
        2024-01-15 07:30:15\t17.3\t55.0\t1.00\n\
        2024-01-15 07:30:30\tnan\tnan\t1.00\n\
        2024-01-15 07:30:45\t17.4\t55.1\t1.25\n";

    fn output(dir: &Path, command: Command) -> String {
        let mut out = Vec::new();
        run(Args { dir: dir.to_path_buf(), command }, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn tail_prints_newest_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20240115-073000.log"), LOG).unwrap();
        let text = output(dir.path(), Command::Tail { n: 2 });
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("===== 20240115-073000"));
        assert!(lines[1].contains("t=  -  "));
        assert!(lines[2].contains("boiler 1.25h"));
    }

    #[test]
    fn show_and_runtime() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20240115-073000.log"), LOG).unwrap();
        let show = Command::Show {
            run: "20240115-073000.log".into(),
        };
        assert_eq!(output(dir.path(), show).lines().count(), 4);
        assert_eq!(output(dir.path(), Command::Runtime), "1.25\n");
        assert!(find_run(dir.path(), "20990101-000000").is_err());
    }

    #[test]
    fn empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("logs");
        assert!(output(&missing, Command::List).starts_with("no runs"));
        assert_eq!(output(&missing, Command::Runtime), "0.00\n");
    }
}
