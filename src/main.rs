use std::path::PathBuf;

use clap::{Parser, Subcommand};

use demo_query::parsing::{ParseProgressReport, ParseWorker};
use demo_query::query::partition::{Pooled, SingleThreaded};
use demo_query::{EventQuery, OutputLayout, PropValue, RowOrder, TickQuery};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// The demo file to read.
    demo: PathBuf,

    /// More logging. Repeat for more; RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Pretty print the json output.
    #[arg(short, long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// The file header.
    Header,

    /// Event types in the demo and how often they occur.
    ListEvents,

    /// Decoded game events.
    Events {
        /// Event names. None means all events.
        #[arg(value_delimiter = ',')]
        names: Vec<String>,

        /// Props read off the players an event references.
        #[arg(long, value_delimiter = ',')]
        player_props: Vec<String>,

        /// Props read off the game rules and team entities.
        #[arg(long, value_delimiter = ',')]
        other_props: Vec<String>,
    },

    /// Projectile trajectories.
    Grenades,

    /// Everyone with a userinfo entry.
    Players,

    /// Player props per tick.
    Ticks {
        /// Prop names, dotted paths or aliases like health or origin.
        #[arg(required = true, value_delimiter = ',')]
        props: Vec<String>,

        /// Only these ticks.
        #[arg(long, value_delimiter = ',')]
        ticks: Option<Vec<u32>>,

        /// Only these SteamID64s.
        #[arg(long, value_delimiter = ',')]
        players: Option<Vec<u64>>,

        /// Only rows where prop=value.
        #[arg(long = "state", value_parser = parse_prop_state)]
        states: Vec<(String, PropValue)>,

        /// One array per prop instead of one object per row.
        #[arg(long)]
        columns: bool,

        /// Sort rows of a tick by SteamID64.
        #[arg(long)]
        by_player: bool,

        /// Decode this many tick ranges in parallel.
        #[arg(long)]
        partitions: Option<usize>,

        /// Pool size for --partitions.
        #[arg(long, requires = "partitions")]
        threads: Option<usize>,

        /// Report progress on stderr while decoding.
        #[arg(long, conflicts_with = "partitions")]
        progress: bool,
    },
}

fn parse_prop_state(text: &str) -> Result<(String, PropValue), String> {
    match text.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), PropValue::parse_loose(value))),
        _ => Err(format!("expected prop=value, got {text:?}")),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<(), Box<dyn std::error::Error>> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

fn run_with_progress(demo: PathBuf, query: TickQuery) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let worker = ParseWorker::new(demo, query);
    let mut total = 0;
    while let Some(report) = worker.wait_next() {
        match report {
            ParseProgressReport::Info(ticks) => total = ticks,
            ParseProgressReport::Working(tick) => eprint!("\rtick {tick}/{total}"),
            ParseProgressReport::Done(table) => {
                eprintln!();
                return Ok(table.to_json());
            }
            ParseProgressReport::Error(err) => {
                eprintln!();
                return Err(err.into());
            }
            ParseProgressReport::Waiting => {}
        }
    }
    Err("parse worker stopped without a result".into())
}

struct TickOptions {
    partitions: Option<usize>,
    threads: Option<usize>,
    progress: bool,
}

fn run_ticks(demo: PathBuf, query: TickQuery, options: TickOptions) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    if options.progress {
        return run_with_progress(demo, query);
    }
    let bytes = std::fs::read(&demo)?;
    let table = match (options.partitions, options.threads) {
        (Some(n), Some(threads)) => demo_query::parse_ticks_partitioned(&bytes, &query, &Pooled::with_threads(threads), n)?,
        (Some(n), None) if n > 1 => demo_query::parse_ticks_partitioned(&bytes, &query, &Pooled::default(), n)?,
        (Some(n), None) => demo_query::parse_ticks_partitioned(&bytes, &query, &SingleThreaded, n)?,
        (None, _) => demo_query::parse_ticks(&bytes, &query, None)?,
    };
    for diagnostic in &table.diagnostics {
        log::warn!("{diagnostic}");
    }
    Ok(table.to_json())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let read = || std::fs::read(&args.demo);
    match args.command {
        Command::Header => print_json(&demo_query::parse_header(&read()?)?, args.pretty),
        Command::ListEvents => print_json(&demo_query::list_game_events(&read()?)?, args.pretty),
        Command::Events {
            names,
            player_props,
            other_props,
        } => {
            let query = EventQuery {
                player_props,
                other_props,
            };
            let output = demo_query::parse_events(&read()?, &names, &query)?;
            for diagnostic in &output.diagnostics {
                log::warn!("{diagnostic}");
            }
            print_json(&output, args.pretty)
        }
        Command::Grenades => print_json(&demo_query::parse_grenades(&read()?)?, args.pretty),
        Command::Players => print_json(&demo_query::parse_player_info(&read()?)?, args.pretty),
        Command::Ticks {
            props,
            ticks,
            players,
            states,
            columns,
            by_player,
            partitions,
            threads,
            progress,
        } => {
            let query = TickQuery {
                wanted_props: props,
                wanted_ticks: ticks,
                wanted_players: players,
                wanted_prop_states: states,
                layout: if columns {
                    OutputLayout::ColumnMajor
                } else {
                    OutputLayout::RowMajor
                },
                order: if by_player {
                    RowOrder::ByPlayerId
                } else {
                    RowOrder::Stream
                },
            };
            let options = TickOptions {
                partitions,
                threads,
                progress,
            };
            let table = run_ticks(args.demo.clone(), query, options)?;
            print_json(&table, args.pretty)
        }
    }
}
