//! Per-topic journal file shared between processes.
//!
//! Record layout (little endian, 40 bytes):
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | crc32 of bytes 4..40                    |
//! | 4      | 1    | kind (1 data, 2 dispose, 3 unregister)  |
//! | 5      | 1    | flags (bit0 coherent, bit1 batch end,   |
//! |        |      | bit2 batch start)                       |
//! | 6      | 2    | reserved                                |
//! | 8      | 8    | writer endpoint id                      |
//! | 16     | 4    | instance id                             |
//! | 20     | 4    | value                                   |
//! | 24     | 8    | coherent set sequence number            |
//! | 32     | 8    | source timestamp (ns)                   |
//!
//! A batch is appended with a single `write_all` on an `O_APPEND` handle. Its
//! first record carries the batch-start flag and its last the batch-end flag,
//! so a reader can drop every batch it did not see whole.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::domain::{Delivery, EndpointId, TopicBus};
use crate::sample::Sample;
use crate::{Error, Result};

pub(crate) const RECORD_LEN: usize = 40;

const KIND_DATA: u8 = 1;
const KIND_DISPOSE: u8 = 2;
const KIND_UNREGISTER: u8 = 3;

const FLAG_COHERENT: u8 = 1 << 0;
const FLAG_BATCH_END: u8 = 1 << 1;
const FLAG_BATCH_START: u8 = 1 << 2;

/// Position of a record inside its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Framing {
    pub(crate) start: bool,
    pub(crate) end: bool,
}

impl Framing {
    fn at(index: usize, len: usize) -> Self {
        Self {
            start: index == 0,
            end: index + 1 == len,
        }
    }
}

pub(crate) fn encode(delivery: &Delivery, framing: Framing) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    let (kind, id, value, timestamp_ns) = match *delivery {
        Delivery::Data {
            sample,
            timestamp_ns,
            ..
        } => (KIND_DATA, sample.id, sample.value, timestamp_ns),
        Delivery::Dispose {
            id, timestamp_ns, ..
        } => (KIND_DISPOSE, id, 0, timestamp_ns),
        Delivery::Unregister {
            id, timestamp_ns, ..
        } => (KIND_UNREGISTER, id, 0, timestamp_ns),
    };
    let mut flags = 0u8;
    if delivery.coherent_set().is_some() {
        flags |= FLAG_COHERENT;
    }
    if framing.start {
        flags |= FLAG_BATCH_START;
    }
    if framing.end {
        flags |= FLAG_BATCH_END;
    }
    buf[4] = kind;
    buf[5] = flags;
    buf[8..16].copy_from_slice(&delivery.writer().raw().to_le_bytes());
    buf[16..20].copy_from_slice(&id.to_le_bytes());
    buf[20..24].copy_from_slice(&value.to_le_bytes());
    buf[24..32].copy_from_slice(&delivery.coherent_set().unwrap_or(0).to_le_bytes());
    buf[32..40].copy_from_slice(&timestamp_ns.to_le_bytes());
    let crc = record_crc(&buf[4..]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Returns the delivery and its place in the batch.
pub(crate) fn decode(buf: &[u8; RECORD_LEN]) -> Result<(Delivery, Framing)> {
    let crc = u32::from_le_bytes(buf[0..4].try_into().expect("slice length"));
    if crc != record_crc(&buf[4..]) {
        return Err(Error::Corrupt("journal record crc mismatch"));
    }
    let kind = buf[4];
    let flags = buf[5];
    let writer = EndpointId::from_raw(u64::from_le_bytes(
        buf[8..16].try_into().expect("slice length"),
    ));
    let id = i32::from_le_bytes(buf[16..20].try_into().expect("slice length"));
    let value = i32::from_le_bytes(buf[20..24].try_into().expect("slice length"));
    let seq = u64::from_le_bytes(buf[24..32].try_into().expect("slice length"));
    let timestamp_ns = u64::from_le_bytes(buf[32..40].try_into().expect("slice length"));
    let coherent_set = (flags & FLAG_COHERENT != 0).then_some(seq);

    let delivery = match kind {
        KIND_DATA => Delivery::Data {
            writer,
            sample: Sample::new(id, value),
            coherent_set,
            timestamp_ns,
        },
        KIND_DISPOSE => Delivery::Dispose {
            writer,
            id,
            coherent_set,
            timestamp_ns,
        },
        KIND_UNREGISTER => Delivery::Unregister {
            writer,
            id,
            timestamp_ns,
        },
        _ => return Err(Error::Corrupt("unknown journal record kind")),
    };
    let framing = Framing {
        start: flags & FLAG_BATCH_START != 0,
        end: flags & FLAG_BATCH_END != 0,
    };
    Ok((delivery, framing))
}

fn record_crc(payload: &[u8]) -> u32 {
    use crc32fast::Hasher;
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

pub(crate) fn journal_path(root: &Path, domain_id: u32, topic: &str) -> PathBuf {
    let file: String = topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    root.join(format!("domain-{domain_id}"))
        .join(format!("{file}.journal"))
}

pub(crate) struct TopicJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl TopicJournal {
    pub(crate) fn open(root: &Path, domain_id: u32, topic: &str) -> Result<Self> {
        let path = journal_path(root, domain_id, topic);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("journal {} opened", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn append(&self, batch: &[Delivery]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(batch.len() * RECORD_LEN);
        for (index, delivery) in batch.iter().enumerate() {
            buf.extend_from_slice(&encode(delivery, Framing::at(index, batch.len())));
        }
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&buf)?;
        Ok(())
    }
}

/// What one poll of the journal produced.
#[derive(Debug, Default)]
pub(crate) struct TailBatch {
    pub(crate) batches: Vec<Vec<Delivery>>,
    pub(crate) lost: u64,
}

/// Reads complete batches appended after the cursor was opened.
///
/// A batch is delivered only when its start record, every middle record and
/// its end record all pass their CRC. Anything else is counted as lost.
pub(crate) struct TailCursor {
    file: File,
    partial: Vec<u8>,
    pending: HashMap<EndpointId, Vec<Delivery>>,
    /// Writer whose batch the last good record left open.
    open: Option<EndpointId>,
}

impl TailCursor {
    pub(crate) fn open_at_end(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            partial: Vec::new(),
            pending: HashMap::new(),
            open: None,
        })
    }

    pub(crate) fn poll(&mut self) -> Result<TailBatch> {
        self.file.read_to_end(&mut self.partial)?;
        let complete = self.partial.len() - self.partial.len() % RECORD_LEN;
        let mut out = TailBatch::default();
        let mut buf = std::mem::take(&mut self.partial);
        for chunk in buf[..complete].chunks(RECORD_LEN) {
            let mut record = [0u8; RECORD_LEN];
            record.copy_from_slice(chunk);
            match decode(&record) {
                Ok((delivery, framing)) => self.accept(delivery, framing, &mut out),
                Err(err) => {
                    warn!("skipping journal record: {err}");
                    out.lost += 1;
                    // The damaged record may belong to the batch in progress.
                    if let Some(writer) = self.open.take() {
                        self.discard(writer, &mut out);
                    }
                }
            }
        }
        buf.drain(..complete);
        self.partial = buf;
        Ok(out)
    }

    fn accept(&mut self, delivery: Delivery, framing: Framing, out: &mut TailBatch) {
        let writer = delivery.writer();
        if framing.start {
            self.discard(writer, out);
            self.pending.insert(writer, Vec::new());
        }
        let Some(pending) = self.pending.get_mut(&writer) else {
            // Its batch start was damaged or predates the cursor.
            out.lost += 1;
            self.open = None;
            return;
        };
        pending.push(delivery);
        if framing.end {
            self.open = None;
            if let Some(batch) = self.pending.remove(&writer) {
                out.batches.push(batch);
            }
        } else {
            self.open = Some(writer);
        }
    }

    /// Drops a writer's unfinished batch.
    fn discard(&mut self, writer: EndpointId, out: &mut TailBatch) {
        if let Some(stale) = self.pending.remove(&writer) {
            if !stale.is_empty() {
                warn!(
                    "dropping {} record(s) of an unfinished batch from writer {writer}",
                    stale.len()
                );
            }
            out.lost += stale.len() as u64;
        }
    }
}

/// Thread feeding journal records to the readers of one topic.
pub(crate) struct JournalTail {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl JournalTail {
    pub(crate) fn spawn(path: PathBuf, poll_interval: Duration, bus: Weak<TopicBus>) -> Result<Self> {
        let mut cursor = TailCursor::open_at_end(&path)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("pubsub-journal-tail".to_string())
            .spawn(move || {
                while !worker_shutdown.load(Ordering::Acquire) {
                    match cursor.poll() {
                        Ok(polled) if polled.batches.is_empty() && polled.lost == 0 => {}
                        Ok(polled) => {
                            let Some(bus) = bus.upgrade() else {
                                break;
                            };
                            for batch in &polled.batches {
                                bus.deliver_local(batch);
                            }
                            if polled.lost > 0 {
                                bus.report_lost(polled.lost);
                            }
                        }
                        Err(err) => warn!("journal {} poll failed: {err}", path.display()),
                    }
                    thread::sleep(poll_interval);
                }
                debug!("journal tail for {} exiting", path.display());
            })?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }
}

impl Drop for JournalTail {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
