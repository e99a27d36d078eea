// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crossbeam::channel::{self, Sender};

use cs_dsp::cali::CaliTable;
use cs_hci::{parse_hci_event, CsRole, HciEvent};
use cs_ras::RasConfig;

use crate::capture::{parse_capture_line, parse_hci_line, HciRecord, ProcedureCapture};
use crate::config::EstimatorConfig;
use crate::estimate::estimate_procedure;
use crate::loopback::Loopback;

/// Parsed input item, tagged with its line number.
type Item<T> = (usize, Result<T, String>);

/// Read `path` line by line on its own thread, parsing each line with `parse`.
fn spawn_reader<T, F>(path: &Path, parse: F) -> Result<(channel::Receiver<Item<T>>, std::thread::JoinHandle<()>), String>
where
    T: Send + 'static,
    F: Fn(&str) -> Result<Option<T>, String> + Send + 'static,
{
    let file = File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
    let (tx, rx) = channel::bounded(64);
    let handle = std::thread::spawn(move || {
        if let Err(e) = read_lines(BufReader::new(file), &parse, &tx) {
            log::error!("reader error: {}", e);
        }
    });
    Ok((rx, handle))
}

fn read_lines<T, F>(reader: impl BufRead, parse: &F, tx: &Sender<Item<T>>) -> io::Result<()>
where
    F: Fn(&str) -> Result<Option<T>, String>,
{
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let item = match parse(&line) {
            Ok(Some(v)) => Ok(v),
            Ok(None) => continue,
            Err(e) => Err(e),
        };
        if tx.send((n + 1, item)).is_err() {
            break;
        }
    }
    Ok(())
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, String> {
    match path {
        Some(p) => {
            let file = File::create(p).map_err(|e| format!("failed to create {}: {}", p.display(), e))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

fn emit<T: serde::Serialize>(out: &mut dyn Write, v: &T) -> Result<(), String> {
    let line = serde_json::to_string(v).map_err(|e| e.to_string())?;
    writeln!(out, "{}", line).map_err(|e| format!("write failed: {}", e))
}

/// Estimate distances for every procedure in a capture file.
pub fn run_estimate(
    input: &Path,
    output: Option<&Path>,
    cfg: &EstimatorConfig,
    cali_path: Option<&Path>,
    print_stats: bool,
) -> Result<(), String> {
    let cali = match cali_path {
        Some(p) => {
            let image = std::fs::read(p).map_err(|e| format!("failed to read {}: {}", p.display(), e))?;
            CaliTable::from_bytes(&image).map_err(|e| e.to_string())?
        }
        None => CaliTable::unity(),
    };
    let mut out = open_output(output)?;
    let (rx, reader_thread) = spawn_reader::<ProcedureCapture, _>(input, parse_capture_line)?;

    let start = Instant::now();
    let mut total = 0u64;
    let mut failed = 0u64;
    let mut degraded = 0u64;

    for (line, item) in rx.iter() {
        total += 1;
        let est = item.and_then(|cap| estimate_procedure(cfg, &cali, &cap));
        match est {
            Ok(e) => {
                if e.failure.is_some() {
                    degraded += 1;
                }
                emit(&mut *out, &e)?;
            }
            Err(e) => {
                failed += 1;
                log::warn!("line {}: {}", line, e);
            }
        }
    }
    out.flush().map_err(|e| format!("write failed: {}", e))?;
    let _ = reader_thread.join();

    if print_stats {
        eprintln!(
            "done ({:.1}s): procedures: {} estimated: {} degraded: {} failed: {}",
            start.elapsed().as_secs_f64(),
            total,
            total - failed,
            degraded,
            failed,
        );
    }
    Ok(())
}

/// Replay an HCI event dump through the RAS server and client.
pub fn run_ras(
    input: &Path,
    output: Option<&Path>,
    cfg: &RasConfig,
    role: CsRole,
    print_stats: bool,
) -> Result<(), String> {
    let mut out = open_output(output)?;
    let (rx, reader_thread) = spawn_reader::<HciRecord, _>(input, parse_hci_line)?;
    let mut lb = Loopback::new(role, cfg.clone());
    let mut last_ms = 0u64;
    let start = Instant::now();

    for (line, item) in rx.iter() {
        let rec = match item {
            Ok(r) => r,
            Err(e) => {
                log::warn!("line {}: {}", line, e);
                continue;
            }
        };
        if rec.time_ms < last_ms {
            log::warn!("line {}: time went backwards ({} < {})", line, rec.time_ms, last_ms);
        }
        last_ms = last_ms.max(rec.time_ms);
        let records = match parse_hci_event(&rec.payload) {
            Ok(HciEvent::Cs(ev)) => lb.on_event(&ev, last_ms),
            Ok(HciEvent::Disconnection(ev)) => lb.on_disconnect(&ev, last_ms),
            Err(e) => {
                lb.stats.bad_events += 1;
                log::warn!("line {}: {}", line, e);
                lb.service(last_ms)
            }
        };
        for r in &records {
            emit(&mut *out, r)?;
        }
    }
    out.flush().map_err(|e| format!("write failed: {}", e))?;
    let _ = reader_thread.join();

    if print_stats {
        eprintln!(
            "done ({:.1}s): events: {} bad: {} procedures: {} delivered: {} timeouts: {} disconnects: {}",
            start.elapsed().as_secs_f64(),
            lb.stats.events,
            lb.stats.bad_events,
            lb.stats.procedures,
            lb.stats.delivered,
            lb.stats.timeouts,
            lb.stats.disconnects,
        );
    }
    Ok(())
}
