//! Follow a trace through the shared store
//!
//! The main thread feeds frames while a printer thread renders transactions
//! as they complete, the way a live monitor would.
//!
//! Usage:
//!   follow_trace [trace.log]     (built-in sample when no file is given)

use apdu_trace_decoder::{CorrelatorConfig, RenderMode, SharedStore, StoreEvent, TraceReader};
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::thread;

const SAMPLE: &str = "\
APDU: 00 A4 04 00 07 A0 00 00 00 03 10 10 00
APDU: 6F 0A 84 08 A0 00 00 00 03 10 10 01 90 00
APDU: 80 CA 9F 7F 00
APDU: 6A 88
APDU: Reset
APDU: 00 B0 00 00 00 01 00
APDU: 48 65 6C 6C 6F 90 00
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let reader: Box<dyn BufRead> = match env::args().nth(1) {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(Cursor::new(SAMPLE)),
    };

    let store = SharedStore::new(CorrelatorConfig::new());
    let events = store.subscribe();

    // Ends when the last store handle (and with it the sender) is dropped
    let printer = thread::spawn(move || {
        for event in events {
            match event {
                StoreEvent::Appended(tx) => {
                    println!("[{}]\n{}\n", tx.case(), tx.render(RenderMode::Readable));
                }
                StoreEvent::Evicted(count) => println!("-- {} evicted --\n", count),
                StoreEvent::Cleared => println!("-- cleared --\n"),
            }
        }
    });

    for frame in TraceReader::new(reader) {
        store.submit(frame?);
    }

    let stats = store.stats();
    drop(store);
    printer.join().map_err(|_| "printer thread panicked")?;

    println!(
        "{} frames, {} transactions completed, {} resets",
        stats.frames, stats.completed, stats.resets
    );
    Ok(())
}
