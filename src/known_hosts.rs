//! Known-hosts store for host key verification
//!
//! File-backed in OpenSSH `known_hosts` layout: one line per entry,
//! `hostname keytype base64key`. Multiple entries may exist per
//! `(hostname, port)`, one per key algorithm.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Result of checking a received host key against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Key matches the stored entry for this algorithm.
    Trusted,
    /// No entry stored under this algorithm (first contact).
    New { fingerprint: String },
    /// Stored entry under the same algorithm differs (potential MITM).
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

#[derive(Clone, Debug)]
struct HostKeyEntry {
    algorithm: String,
    key_b64: String,
}

/// Thread-safe known hosts store: an in-memory cache over an append-only file.
pub struct KnownHostsStore {
    /// host lookup key -> entries (one per algorithm)
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
    path: PathBuf,
}

impl KnownHostsStore {
    /// Open the store at the default location (`~/.ssh/known_hosts`).
    pub fn open_default() -> Self {
        let path = dirs::home_dir()
            .map(|h| h.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from(".known_hosts"));
        Self::with_path(path)
    }

    /// Open the store at a custom path.
    pub fn with_path(path: PathBuf) -> Self {
        let store = Self {
            hosts: RwLock::new(HashMap::new()),
            path,
        };
        if let Err(e) = store.load() {
            debug!("known_hosts not loaded: {}", e);
        }
        store
    }

    fn load(&self) -> std::io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut hosts = self.hosts.write();
        let mut entry_count = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname keytype base64key [comment]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }

            let entry = HostKeyEntry {
                algorithm: parts[1].to_string(),
                key_b64: parts[2].to_string(),
            };

            for hostname in parts[0].split(',') {
                // Hashed hostnames (|1|...) are not supported.
                if hostname.starts_with('|') {
                    continue;
                }
                hosts
                    .entry(hostname.to_lowercase())
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        info!(
            "loaded {} known host entries ({} unique hosts)",
            entry_count,
            hosts.len()
        );
        Ok(())
    }

    /// Lookup key for `(host, port)`: bare hostname for port 22,
    /// `[host]:port` otherwise, matching OpenSSH.
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// SHA-256 fingerprint of a raw key blob, OpenSSH presentation.
    pub fn fingerprint(key_blob: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key_blob);
        let hash = hasher.finalize();
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    /// Check a received host key. Deterministic: the same
    /// `(host, port, algorithm, blob)` against the same store always yields
    /// the same verdict, with no side effects.
    pub fn verify(&self, host: &str, port: u16, algorithm: &str, key_blob: &[u8]) -> Verdict {
        let lookup_key = Self::make_key(host, port);
        let actual_b64 = BASE64.encode(key_blob);
        let fingerprint = Self::fingerprint(key_blob);

        let hosts = self.hosts.read();
        let Some(entries) = hosts.get(&lookup_key) else {
            debug!("unknown host: {}", lookup_key);
            return Verdict::New { fingerprint };
        };

        for entry in entries {
            if entry.algorithm == algorithm {
                if entry.key_b64 == actual_b64 {
                    debug!("host key verified for {} ({})", lookup_key, algorithm);
                    return Verdict::Trusted;
                }
                let expected_fingerprint = fingerprint_from_b64(&entry.key_b64);
                warn!(
                    "host key changed for {} ({})! expected {}, got {}",
                    lookup_key, algorithm, expected_fingerprint, fingerprint
                );
                return Verdict::Changed {
                    expected_fingerprint,
                    actual_fingerprint: fingerprint,
                };
            }
        }

        // Host known, but not under this algorithm: treat as first contact
        // for the new key type.
        debug!(
            "host {} known but no {} key stored, treating as new",
            lookup_key, algorithm
        );
        Verdict::New { fingerprint }
    }

    /// Persist a newly accepted host key: updates the cache and appends to
    /// the backing file.
    pub fn add(&self, host: &str, port: u16, algorithm: &str, key_blob: &[u8]) -> std::io::Result<()> {
        let lookup_key = Self::make_key(host, port);
        let key_b64 = BASE64.encode(key_blob);

        {
            let mut hosts = self.hosts.write();
            hosts.entry(lookup_key.clone()).or_default().push(HostKeyEntry {
                algorithm: algorithm.to_string(),
                key_b64: key_b64.clone(),
            });
        }

        self.append_to_file(&lookup_key, algorithm, &key_b64)?;

        info!("added host key for {} ({}) to known_hosts", lookup_key, algorithm);
        Ok(())
    }

    /// Number of stored entries for `(host, port)` across all algorithms.
    pub fn entry_count(&self, host: &str, port: u16) -> usize {
        self.hosts
            .read()
            .get(&Self::make_key(host, port))
            .map(|v| v.len())
            .unwrap_or(0)
    }

    fn append_to_file(&self, host: &str, algorithm: &str, key_b64: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {} {}", host, algorithm, key_b64)?;
        Ok(())
    }
}

fn fingerprint_from_b64(stored_b64: &str) -> String {
    match BASE64.decode(stored_b64) {
        Ok(bytes) => KnownHostsStore::fingerprint(&bytes),
        Err(_) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ALGO: &str = "ssh-ed25519";

    fn temp_store(dir: &tempfile::TempDir) -> KnownHostsStore {
        KnownHostsStore::with_path(dir.path().join("known_hosts"))
    }

    #[test]
    fn unknown_host_is_new() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir);
        assert!(matches!(
            store.verify("example.com", 22, ALGO, b"blob-a"),
            Verdict::New { .. }
        ));
    }

    #[test]
    fn added_key_is_trusted_and_survives_reload() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir);
        store.add("example.com", 22, ALGO, b"blob-a").unwrap();
        assert_eq!(store.verify("example.com", 22, ALGO, b"blob-a"), Verdict::Trusted);

        // Fresh store over the same file sees the persisted entry.
        let reloaded = temp_store(&dir);
        assert_eq!(
            reloaded.verify("example.com", 22, ALGO, b"blob-a"),
            Verdict::Trusted
        );
    }

    #[test]
    fn differing_blob_same_algorithm_is_changed() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir);
        store.add("example.com", 22, ALGO, b"blob-a").unwrap();
        assert!(matches!(
            store.verify("example.com", 22, ALGO, b"blob-b"),
            Verdict::Changed { .. }
        ));
    }

    #[test]
    fn different_algorithm_is_new_not_changed() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir);
        store.add("example.com", 22, ALGO, b"blob-a").unwrap();
        assert!(matches!(
            store.verify("example.com", 22, "ssh-rsa", b"blob-b"),
            Verdict::New { .. }
        ));
    }

    #[test]
    fn nondefault_port_is_distinct() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir);
        store.add("example.com", 2222, ALGO, b"blob-a").unwrap();
        assert!(matches!(
            store.verify("example.com", 22, ALGO, b"blob-a"),
            Verdict::New { .. }
        ));
        assert_eq!(
            store.verify("example.com", 2222, ALGO, b"blob-a"),
            Verdict::Trusted
        );
    }

    #[test]
    fn verify_is_deterministic_and_side_effect_free() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir);
        let first = store.verify("example.com", 22, ALGO, b"blob-a");
        let second = store.verify("example.com", 22, ALGO, b"blob-a");
        assert_eq!(first, second);
        assert_eq!(store.entry_count("example.com", 22), 0);
    }
}
