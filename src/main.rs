//! Example driver: a minimal interactive loop wiring the
//! dispatcher up to stdin/stdout. Each line of stdin is a JSON-encoded
//! `Request`; each reply is written back as a JSON-encoded `Response` on
//! its own line. Real clients are expected to speak the same framing over
//! a socket instead — this binary exists to exercise the library end to
//! end, not to be a finished tool.

use std::io::{self, BufRead, Write};

use structopt::StructOpt;

use tracehound::config::Config;
use tracehound::log::LogLevel;
use tracehound::{Engine, Request, Response};

fn main() {
    let config = Config::from_args();
    config.apply_logging();

    let engine = match Engine::new(config.executable_path.clone()) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to load {:?}: {}", config.executable_path, e);
            std::process::exit(1);
        }
    };

    tracehound::log!(LogLevel::LogInfo, "loaded {:?}", config.executable_path);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let response = Response::Error {
                    message: format!("bad request: {}", e),
                };
                let _ = writeln!(out, "{}", serde_json::to_string(&response).unwrap());
                continue;
            }
        };
        let response = engine.handle(request);
        match serde_json::to_string(&response) {
            Ok(json) => {
                let _ = writeln!(out, "{}", json);
            }
            Err(e) => {
                eprintln!("failed to encode response: {}", e);
            }
        }
        let _ = out.flush();
    }
}
