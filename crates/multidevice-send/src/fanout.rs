use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    BundleFetcher, CipherAdapter, CipherError, DeviceAddress, EncryptedEnvelope, FetchError,
    KeyBundle,
};

/// Per-device exclusive sections. Held around every pairwise encrypt and
/// around the establish-then-encrypt pair of the retry pass, so establishing
/// a session never races an encrypt for the same device.
///
/// Entries only live while some caller holds or waits on them, so the map is
/// bounded by the number of devices currently being encrypted for.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<DeviceAddress, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `device`.
    pub fn with_lock<R>(&self, device: &DeviceAddress, f: impl FnOnce() -> R) -> R {
        let lock = self.lock_for(device);
        let result = {
            let _guard = lock.lock().unwrap();
            f()
        };
        drop(lock);
        self.release(device);
        result
    }

    fn lock_for(&self, device: &DeviceAddress) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(device.clone()).or_default().clone()
    }

    // Clones are only handed out under the map lock, so a count of one here
    // means nobody holds or waits on the entry.
    fn release(&self, device: &DeviceAddress) {
        let mut locks = self.locks.lock().unwrap();
        if locks
            .get(device)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(device);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    #[error("encryption failed: {0}")]
    Encrypt(CipherError),

    #[error("session establishment failed: {0}")]
    Establish(CipherError),

    #[error("key bundle unavailable: {0}")]
    Fetch(FetchError),

    #[error("key bundle query failed: {0}")]
    FetchBatch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedDevice {
    pub address: DeviceAddress,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// One envelope per successfully encrypted device, in input order.
    pub envelopes: Vec<EncryptedEnvelope>,
    pub any_used_bundle: bool,
    pub dropped: Vec<DroppedDevice>,
}

impl FanoutReport {
    pub fn attempted(&self) -> usize {
        self.envelopes.len() + self.dropped.len()
    }
}

pub struct FanoutEngine<'a> {
    cipher: &'a CipherAdapter,
    fetcher: &'a dyn BundleFetcher,
    locks: &'a SessionLocks,
    own: &'a DeviceAddress,
    max_workers: usize,
}

impl<'a> FanoutEngine<'a> {
    pub fn new(
        cipher: &'a CipherAdapter,
        fetcher: &'a dyn BundleFetcher,
        locks: &'a SessionLocks,
        own: &'a DeviceAddress,
        max_workers: usize,
    ) -> Self {
        Self {
            cipher,
            fetcher,
            locks,
            own,
            max_workers,
        }
    }

    /// Encrypt `plaintext` for every device. Devices of the sender's own user
    /// get `self_plaintext` instead when it is present.
    ///
    /// Each device gets at most two encryption attempts. Devices without a
    /// session are collected and their bundles fetched with a single query;
    /// everything that still fails is dropped and reported, never escalated.
    pub fn fanout(
        &self,
        devices: &[DeviceAddress],
        message_id: &str,
        plaintext: &[u8],
        self_plaintext: Option<&[u8]>,
    ) -> FanoutReport {
        let mut seen = HashSet::new();
        let devices: Vec<&DeviceAddress> = devices.iter().filter(|d| seen.insert(*d)).collect();

        let payload_for = |device: &DeviceAddress| match self_plaintext {
            Some(own_copy) if device.user == self.own.user => own_copy,
            _ => plaintext,
        };

        let first_pass = run_bounded(&devices, self.max_workers, |&device| {
            self.locks.with_lock(device, || {
                self.cipher.encrypt_pairwise(device, payload_for(device))
            })
        });

        let mut slots: Vec<Option<EncryptedEnvelope>> = vec![None; devices.len()];
        let mut dropped: Vec<(usize, DropReason)> = Vec::new();
        let mut retry: Vec<usize> = Vec::new();

        for (i, result) in first_pass.into_iter().enumerate() {
            match result {
                Ok(envelope) => slots[i] = Some(envelope),
                Err(CipherError::NoSession) => {
                    debug!(message_id, device = %devices[i], "No session with device, fetching bundle");
                    retry.push(i);
                }
                Err(err) => {
                    warn!(message_id, device = %devices[i], error = %err, "Failed to encrypt for device");
                    dropped.push((i, DropReason::Encrypt(err)));
                }
            }
        }

        if !retry.is_empty() {
            let retry_devices: Vec<DeviceAddress> =
                retry.iter().map(|&i| devices[i].clone()).collect();
            match self.fetcher.fetch_bundles(&retry_devices) {
                Err(err) => {
                    warn!(message_id, count = retry.len(), error = %err, "Failed to fetch key bundles");
                    let reason = DropReason::FetchBatch(err.to_string());
                    dropped.extend(retry.iter().map(|&i| (i, reason.clone())));
                }
                Ok(bundles) => {
                    let second_pass = run_bounded(&retry, self.max_workers, |&i| {
                        let device = devices[i];
                        match bundles.get(device) {
                            Some(Ok(bundle)) => {
                                self.establish_and_encrypt(device, bundle, payload_for(device))
                            }
                            Some(Err(err)) => Err(DropReason::Fetch(err.clone())),
                            None => Err(DropReason::Fetch(FetchError::Missing)),
                        }
                    });

                    for (&i, result) in retry.iter().zip(second_pass) {
                        match result {
                            Ok(envelope) => slots[i] = Some(envelope),
                            Err(reason) => {
                                warn!(message_id, device = %devices[i], error = %reason, "Dropping device after retry");
                                dropped.push((i, reason));
                            }
                        }
                    }
                }
            }
        }

        dropped.sort_by_key(|(i, _)| *i);
        let envelopes: Vec<EncryptedEnvelope> = slots.into_iter().flatten().collect();
        FanoutReport {
            any_used_bundle: envelopes.iter().any(|e| e.used_bundle),
            envelopes,
            dropped: dropped
                .into_iter()
                .map(|(i, reason)| DroppedDevice {
                    address: devices[i].clone(),
                    reason,
                })
                .collect(),
        }
    }
}

impl FanoutEngine<'_> {
    fn establish_and_encrypt(
        &self,
        device: &DeviceAddress,
        bundle: &KeyBundle,
        payload: &[u8],
    ) -> Result<EncryptedEnvelope, DropReason> {
        self.locks.with_lock(device, || -> Result<EncryptedEnvelope, DropReason> {
            // Another dispatch may have established it meanwhile.
            if !self.cipher.has_session(device).map_err(DropReason::Establish)? {
                self.cipher
                    .establish_from_bundle(device, bundle)
                    .map_err(DropReason::Establish)?;
            }
            let mut envelope = self
                .cipher
                .encrypt_pairwise(device, payload)
                .map_err(DropReason::Encrypt)?;
            envelope.used_bundle = true;
            Ok(envelope)
        })
    }
}

/// Run `job` over `items` on at most `max_workers` scoped threads pulling from
/// a shared queue. Results come back in input order.
fn run_bounded<T, R, F>(items: &[T], max_workers: usize, job: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = max_workers.clamp(1, items.len());

    let (job_tx, job_rx) = crossbeam_channel::bounded::<usize>(items.len());
    let (result_tx, result_rx) = crossbeam_channel::bounded::<(usize, R)>(items.len());
    for i in 0..items.len() {
        // Capacity equals the job count and the receiver is alive.
        let _ = job_tx.send(i);
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let job = &job;
            scope.spawn(move || {
                for i in job_rx.iter() {
                    if result_tx.send((i, job(&items[i]))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    for (i, result) in result_rx.try_iter() {
        results[i] = Some(result);
    }
    results.into_iter().flatten().collect()
}
