//! CLI client for the `serpentd` daemon.
//!
//! Examples:
//!   serpent-cli train 50000 --grid 10 --envs 4 --mode obstacles
//!   serpent-cli watch <run_id>
//!   serpent-cli cancel <run_id>
//!   serpent-cli active
//!   serpent-cli play reset 12 obstacles
//!   serpent-cli play step left
//!   serpent-cli play food 3 4
//!
//! By default it talks to 127.0.0.1:9877; override with `--addr host:port`.

use serde::{Deserialize, Serialize};
use serpent::snake::{CELL_BODY, CELL_FOOD, CELL_WALL};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Request {
    StartTraining {
        timesteps: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        grid_size: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        n_envs: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resume_from: Option<String>,
    },
    JobStatus { run_id: String },
    WatchJob { run_id: String, interval_ms: Option<u64> },
    CancelJob { run_id: String },
    CleanupJob { run_id: String },
    ActiveJobs,
    ListPolicies,
    PlayReset {
        grid_size: Option<usize>,
        mode: Option<String>,
        seed: Option<u64>,
    },
    PlayStep { action: Option<String> },
    PlayInteract { kind: String, x: i64, y: i64 },
    PlaySetMode { mode: String },
    PlayLoadPolicy { run_id: Option<String> },
    PlayState,
    PlayStart,
    PlayStop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Response {
    TrainingStarted { run_id: String },
    Job(JobLine),
    JobUnknown { run_id: String },
    WatchEnd {
        run_id: String,
        #[serde(default)]
        status: Option<String>,
    },
    ActiveJobs { run_ids: Vec<String> },
    Policies { policies: Vec<PolicyLine> },
    PlayState(PlayLine),
    PlayStep { outcome: OutcomeLine, state: PlayLine },
    Success { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobLine {
    run_id: String,
    status: String,
    progress: f32,
    timesteps_done: u64,
    timesteps_total: u64,
    #[serde(default)]
    stats: BTreeMap<String, f64>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolicyLine {
    run_id: String,
    grid_size: usize,
    mode: String,
    timesteps: u64,
    #[serde(default)]
    mean_reward: Option<f32>,
    #[serde(default)]
    parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlayLine {
    grid: Vec<Vec<u8>>,
    score: u32,
    is_dead: bool,
    length: usize,
    mode: String,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    episode_return: f32,
    #[serde(default)]
    episodes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OutcomeLine {
    action: String,
    reward: f32,
    terminated: bool,
    truncated: bool,
}

/// Where the daemon keeps its files, resolved the same way it does.
fn daemon_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("serpent"))
}

fn usage() -> ! {
    eprintln!("serpent-cli (talks to serpentd @ 127.0.0.1:9877 by default)");
    eprintln!("Usage: serpent-cli [--addr host:port] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  train <timesteps> [--grid N] [--envs N] [--mode plain|obstacles] [--seed S] [--resume RUN]");
    eprintln!("  status <run_id>             Latest snapshot of a run");
    eprintln!("  watch <run_id> [ms]         Stream snapshots until the run ends");
    eprintln!("  cancel <run_id>             Request cancellation");
    eprintln!("  cleanup <run_id>            Forget a finished run");
    eprintln!("  active                      List runs still in progress");
    eprintln!("  policies                    List trained policies");
    eprintln!("  play reset [size] [mode]    Start a new live episode");
    eprintln!("  play step [up|down|left|right]");
    eprintln!("  play food <x> <y> | play wall <x> <y>");
    eprintln!("  play mode <plain|obstacles>");
    eprintln!("  play policy [run_id]        Steer with a policy (none = human)");
    eprintln!("  play state | start | stop");
    eprintln!("  paths                       Show data directory and config path");
    process::exit(1);
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut addr = "127.0.0.1:9877".to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (addr, args)
}

fn fail(msg: &str) -> ! {
    eprintln!("{}", msg);
    process::exit(1);
}

fn arg<T: std::str::FromStr>(args: &[String], i: usize, what: &str) -> T {
    let Some(raw) = args.get(i) else { usage() };
    raw.parse()
        .unwrap_or_else(|_| fail(&format!("{what} must be a number")))
}

fn connect(addr: &str, timeout: Option<Duration>) -> Result<(TcpStream, BufReader<TcpStream>), String> {
    let stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
    stream
        .set_read_timeout(timeout)
        .map_err(|e| format!("set_read_timeout: {e}"))?;
    let reader = BufReader::new(stream.try_clone().map_err(|e| format!("clone: {e}"))?);
    Ok((stream, reader))
}

fn write_request(stream: &mut TcpStream, req: &Request) -> Result<(), String> {
    let line = serde_json::to_string(req).map_err(|e| format!("serialize: {e}"))?;
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .map_err(|e| format!("send: {e}"))
}

fn read_response(reader: &mut BufReader<TcpStream>) -> Result<Response, String> {
    let mut resp_line = String::new();
    let n = reader
        .read_line(&mut resp_line)
        .map_err(|e| format!("recv: {e}"))?;
    if n == 0 {
        return Err("connection closed".to_string());
    }
    serde_json::from_str(&resp_line).map_err(|e| format!("parse response: {e}"))
}

fn send_request(addr: &str, req: &Request) -> Result<Response, String> {
    let (mut stream, mut reader) = connect(addr, Some(Duration::from_secs(5)))?;
    write_request(&mut stream, req)?;
    read_response(&mut reader)
}

fn print_job(j: &JobLine) {
    let mut line = format!(
        "{} status={:<12} progress={:>5.1}% steps={}/{}",
        j.run_id,
        j.status,
        j.progress * 100.0,
        j.timesteps_done,
        j.timesteps_total,
    );
    for (k, v) in &j.stats {
        line.push_str(&format!(" {k}={v:.3}"));
    }
    if let Some(e) = &j.error_message {
        line.push_str(&format!(" error={e:?}"));
    }
    println!("{line}");
}

fn print_board(p: &PlayLine) {
    for row in &p.grid {
        let line: String = row
            .iter()
            .map(|&c| match c {
                CELL_BODY => 'o',
                CELL_FOOD => '*',
                CELL_WALL => '#',
                _ => '.',
            })
            .collect();
        println!("{line}");
    }
    println!(
        "mode={} running={} score={} length={} dead={} return={:.2} episodes={} policy={}",
        p.mode,
        p.running,
        p.score,
        p.length,
        p.is_dead,
        p.episode_return,
        p.episodes,
        p.policy.as_deref().unwrap_or("-"),
    );
}

fn print_response(resp: Response) {
    match resp {
        Response::TrainingStarted { run_id } => println!("{run_id}"),
        Response::Job(j) => print_job(&j),
        Response::JobUnknown { run_id } => {
            eprintln!("Unknown job: {run_id}");
            process::exit(2);
        }
        Response::WatchEnd { run_id, status } => {
            println!("{} finished: {}", run_id, status.as_deref().unwrap_or("?"));
        }
        Response::ActiveJobs { run_ids } => {
            for id in run_ids {
                println!("{id}");
            }
        }
        Response::Policies { policies } => {
            for p in policies {
                println!(
                    "{} grid={} mode={} steps={} mean_reward={} parent={}",
                    p.run_id,
                    p.grid_size,
                    p.mode,
                    p.timesteps,
                    p.mean_reward
                        .map(|r| format!("{r:.3}"))
                        .unwrap_or_else(|| "-".to_string()),
                    p.parent.as_deref().unwrap_or("-"),
                );
            }
        }
        Response::PlayState(p) => print_board(&p),
        Response::PlayStep { outcome, state } => {
            print_board(&state);
            println!(
                "action={} reward={:.2} terminated={} truncated={}",
                outcome.action, outcome.reward, outcome.terminated, outcome.truncated
            );
        }
        Response::Success { message } => println!("{message}"),
        Response::Error { message } => {
            eprintln!("Error: {message}");
            process::exit(1);
        }
    }
}

fn watch(addr: &str, req: &Request) -> Result<(), String> {
    let (mut stream, mut reader) = connect(addr, None)?;
    write_request(&mut stream, req)?;
    loop {
        let resp = read_response(&mut reader)?;
        let last = matches!(
            resp,
            Response::WatchEnd { .. } | Response::JobUnknown { .. } | Response::Error { .. }
        );
        print_response(resp);
        if last {
            return Ok(());
        }
    }
}

fn train_request(args: &[String]) -> Request {
    let timesteps: u64 = arg(args, 1, "timesteps");
    let (mut grid_size, mut n_envs, mut mode, mut seed, mut resume_from) =
        (None, None, None, None, None);

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--grid" => grid_size = Some(arg(args, i + 1, "--grid")),
            "--envs" => n_envs = Some(arg(args, i + 1, "--envs")),
            "--seed" => seed = Some(arg(args, i + 1, "--seed")),
            "--mode" => mode = Some(args.get(i + 1).cloned().unwrap_or_else(|| usage())),
            "--resume" => resume_from = Some(args.get(i + 1).cloned().unwrap_or_else(|| usage())),
            other => fail(&format!("unknown option {other}")),
        }
        i += 2;
    }

    Request::StartTraining {
        timesteps,
        grid_size,
        n_envs,
        mode,
        seed,
        resume_from,
    }
}

fn play_request(args: &[String]) -> Request {
    let Some(sub) = args.get(1) else { usage() };
    match sub.as_str() {
        "reset" => Request::PlayReset {
            grid_size: args.get(2).map(|_| arg(args, 2, "size")),
            mode: args.get(3).cloned(),
            seed: None,
        },
        "step" => Request::PlayStep {
            action: args.get(2).cloned(),
        },
        "food" | "wall" => Request::PlayInteract {
            kind: format!("place_{sub}"),
            x: arg(args, 2, "x"),
            y: arg(args, 3, "y"),
        },
        "mode" => Request::PlaySetMode {
            mode: args.get(2).cloned().unwrap_or_else(|| usage()),
        },
        "policy" => Request::PlayLoadPolicy {
            run_id: args.get(2).cloned(),
        },
        "state" => Request::PlayState,
        "start" => Request::PlayStart,
        "stop" => Request::PlayStop,
        _ => usage(),
    }
}

fn run_id(args: &[String]) -> String {
    args.get(1).cloned().unwrap_or_else(|| usage())
}

fn main() {
    let (addr, args) = parse_args();
    let cmd = &args[0];

    let req = match cmd.as_str() {
        "train" => train_request(&args),
        "status" => Request::JobStatus {
            run_id: run_id(&args),
        },
        "watch" => {
            let req = Request::WatchJob {
                run_id: run_id(&args),
                interval_ms: args.get(2).map(|_| arg(&args, 2, "interval")),
            };
            if let Err(e) = watch(&addr, &req) {
                fail(&format!("Failed: {e}"));
            }
            return;
        }
        "cancel" => Request::CancelJob {
            run_id: run_id(&args),
        },
        "cleanup" => Request::CleanupJob {
            run_id: run_id(&args),
        },
        "active" => Request::ActiveJobs,
        "policies" => Request::ListPolicies,
        "play" => play_request(&args),
        "paths" => {
            // Special command: doesn't need daemon, just print paths
            let Some(dir) = daemon_dir() else {
                fail("No platform data directory");
            };
            println!("Data directory: {}", dir.display());
            println!("Config file: {}", dir.join("config.json").display());
            process::exit(0);
        }
        _ => usage(),
    };

    match send_request(&addr, &req) {
        Ok(resp) => print_response(resp),
        Err(e) => fail(&format!("Failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_dir_follows_the_platform_data_dir() {
        match dirs::data_dir() {
            Some(base) => {
                let dir = daemon_dir().unwrap();
                assert_eq!(dir, base.join("serpent"));
                assert!(dir.ends_with("serpent"));
            }
            None => assert!(daemon_dir().is_none()),
        }
    }
}
