//! Minimal CLI for the krystal merge gate.
//!
//! `kaid serve` runs the HTTP service adapter; `kaid inhale` / `state` /
//! `urls` / `seal` operate directly on the on-disk registry so the store
//! can be driven from scripts and tests without standing up a server.

use kai_registry::config::Config;
use kai_registry::registry::RegistryStore;
use std::env;
use std::fs;
use std::sync::Arc;

fn main() {
    let mut args = env::args().skip(1);
    let command = args.next();
    let tail: Vec<String> = args.collect();
    match command.as_deref() {
        Some("serve") => cmd_serve(tail),
        Some("inhale") => cmd_inhale(tail),
        Some("state") => cmd_state(),
        Some("urls") => cmd_urls(tail),
        Some("seal") => cmd_seal(),
        _ => {
            eprintln!("Usage: kaid <serve|inhale|state|urls|seal> ...");
            std::process::exit(1);
        }
    }
}

fn cmd_serve(tail: Vec<String>) {
    let mut config = Config::from_env();
    let mut iter = tail.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--listen" {
            if let Some(addr) = iter.next() {
                config.listen_addr = addr;
            }
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");
    let listen_addr = config.listen_addr.clone();
    let store = Arc::new(RegistryStore::load(config));
    if let Err(err) = runtime.block_on(kai_registry::service::run_server(store, &listen_addr)) {
        eprintln!("kaid serve: {err}");
        std::process::exit(1);
    }
}

fn cmd_inhale(tail: Vec<String>) {
    if tail.is_empty() {
        eprintln!("Usage: kaid inhale <file.json>...");
        std::process::exit(1);
    }
    let config = Config::from_env();
    let store = RegistryStore::load(config);

    let mut files = Vec::with_capacity(tail.len());
    for path in &tail {
        match fs::read(path) {
            Ok(bytes) => files.push((path.clone(), bytes)),
            Err(err) => {
                eprintln!("kaid inhale: failed to read {path}: {err}");
                std::process::exit(1);
            }
        }
    }

    let report = store.inhale(&files);
    print_json(&report);
}

fn cmd_state() {
    let store = RegistryStore::load(Config::from_env());
    print_json(&store.get_state());
}

fn cmd_urls(tail: Vec<String>) {
    let mut offset = 0usize;
    let mut limit = 100usize;
    let mut iter = tail.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--offset" => {
                if let Some(v) = iter.next().and_then(|v| v.parse().ok()) {
                    offset = v;
                }
            }
            "--limit" => {
                if let Some(v) = iter.next().and_then(|v| v.parse().ok()) {
                    limit = v;
                }
            }
            _ => {}
        }
    }
    let store = RegistryStore::load(Config::from_env());
    let (page, total) = store.exhale_urls_page(offset, limit);
    print_json(&serde_json::json!({"urls": page, "total": total}));
}

fn cmd_seal() {
    let store = RegistryStore::load(Config::from_env());
    print_json(&serde_json::json!({"seal": store.get_seal()}));
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("kaid: failed to encode output: {err}");
            std::process::exit(1);
        }
    }
}
