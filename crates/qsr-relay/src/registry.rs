//! Pickup-code registry: code records, the status state machine, usage
//! accounting, and content dedup.
//!
//! Status transitions are one-directional:
//!
//! ```text
//! waiting → transferring → completed
//!    └──────────┴────────→ expired | invalidated
//! ```
//!
//! Expiry is applied lazily whenever a record is touched, so a code past its
//! deadline answers `EXPIRED` even between cleanup sweeps.
//!
//! Dedup never compares plaintext hashes directly: the whole-file hash is
//! mixed with the owner id and a server-private pepper through a keyed
//! BLAKE3 hash, so equal fingerprints imply equal content *for the same
//! owner* and the fingerprint table leaks nothing across owners.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::SystemTime;

use qsr_core::code::PickupCode;
use qsr_core::error::{RelayError, RelayResult};
use qsr_core::types::{
    CodeIssue, CodeStatus, CodeStatusView, CreateCodeRequest, FileId, IssuedCode, OwnerId,
    SessionId, UsageSummary,
};
use qsr_core::UNLIMITED_USES;

const PEPPER_CONTEXT: &str = "qsr-relay 2024-06 dedup pepper";

#[derive(Debug)]
struct CodeRecord {
    owner: OwnerId,
    file_id: FileId,
    status: CodeStatus,
    usage_limit: u32,
    used_count: u32,
    expires_at: SystemTime,
    sessions: HashSet<SessionId>,
}

impl CodeRecord {
    /// Lazy expiry: flip a non-terminal record past its deadline.
    fn apply_expiry(&mut self, now: SystemTime) {
        if !self.status.is_terminal() && self.expires_at <= now {
            self.status = CodeStatus::Expired;
        }
    }

    fn unlimited(&self) -> bool {
        self.usage_limit == UNLIMITED_USES
    }
}

#[derive(Debug)]
struct FileEntry {
    fingerprint: Option<[u8; 32]>,
    /// Every code lookup issued against this file, aliases included.
    lookups: Vec<String>,
}

#[derive(Default)]
struct Inner {
    codes: HashMap<String, CodeRecord>,
    files: HashMap<(OwnerId, FileId), FileEntry>,
    fingerprints: HashMap<[u8; 32], (OwnerId, FileId)>,
    next_file_id: FileId,
}

/// What one cleanup sweep decided.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Records flipped from a live status to `Expired`.
    pub expired_marked: usize,
    /// Files whose codes are now all terminal; their chunks and metadata can
    /// be purged from the byte store.
    pub purged_files: Vec<(OwnerId, FileId)>,
    /// Terminal code lookups whose wrapped keys can be purged.
    pub purged_lookups: Vec<(OwnerId, String)>,
    /// Every owner holding a code record when the sweep ran; the caller
    /// evicts each owner's expired store entries separately.
    pub owners: Vec<OwnerId>,
}

/// Resolution of a receiver-presented lookup segment.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedCode {
    pub owner: OwnerId,
    pub file_id: FileId,
    pub status: CodeStatus,
}

pub struct PickupCodeRegistry {
    inner: Mutex<Inner>,
    pepper: [u8; 32],
    generation_attempts: u32,
}

impl PickupCodeRegistry {
    /// `pepper` is the configured dedup pepper; when empty a random one is
    /// drawn, which makes fingerprints valid only for this process lifetime
    /// (fine for an in-memory registry).
    pub fn new(pepper: &str, generation_attempts: u32) -> Self {
        let pepper = if pepper.is_empty() {
            rand::random()
        } else {
            blake3::derive_key(PEPPER_CONTEXT, pepper.as_bytes())
        };
        PickupCodeRegistry {
            inner: Mutex::new(Inner::default()),
            pepper,
            generation_attempts: generation_attempts.max(1),
        }
    }

    fn fingerprint(&self, owner: OwnerId, content_hash: &str) -> [u8; 32] {
        let mut input = Vec::with_capacity(8 + 1 + content_hash.len());
        input.extend_from_slice(&owner.to_be_bytes());
        input.push(b':');
        input.extend_from_slice(content_hash.as_bytes());
        *blake3::keyed_hash(&self.pepper, &input).as_bytes()
    }

    fn generate_lookup(&self, inner: &Inner) -> RelayResult<PickupCode> {
        for _ in 0..self.generation_attempts {
            let code = PickupCode::generate();
            if !inner.codes.contains_key(code.lookup()) {
                return Ok(code);
            }
        }
        Err(RelayError::Storage(format!(
            "no unused pickup code after {} attempts",
            self.generation_attempts
        )))
    }

    /// Issue a code, detecting duplicate content and honoring an explicit
    /// reuse request. Dedup is advisory: on a hit the caller gets
    /// [`CodeIssue::Duplicate`] and must itself decide between reuse and
    /// invalidate-then-retry.
    pub fn create_code(
        &self,
        owner: OwnerId,
        req: &CreateCodeRequest,
    ) -> RelayResult<CodeIssue> {
        let now = SystemTime::now();
        let expires_at = now + req.ttl;
        let mut inner = self.inner.lock().unwrap();

        if let Some(reuse_id) = req.reuse_file_id {
            if !inner.files.contains_key(&(owner, reuse_id)) {
                return Err(RelayError::FileNotFound { file_id: reuse_id });
            }
            let code = self.generate_lookup(&inner)?;
            let lookup = code.lookup().to_string();
            inner.codes.insert(
                lookup.clone(),
                CodeRecord {
                    owner,
                    file_id: reuse_id,
                    status: CodeStatus::Waiting,
                    usage_limit: req.usage_limit,
                    used_count: 0,
                    expires_at,
                    sessions: HashSet::new(),
                },
            );
            let entry = inner
                .files
                .get_mut(&(owner, reuse_id))
                .expect("presence checked above");
            entry.lookups.push(lookup);
            tracing::info!(owner, file_id = reuse_id, code = %code, "issued alias code for existing file");
            return Ok(CodeIssue::Issued(IssuedCode {
                code,
                file_id: reuse_id,
                expires_at,
                reused: true,
            }));
        }

        let fingerprint = req
            .content_hash
            .as_deref()
            .map(|hash| self.fingerprint(owner, hash));

        if let Some(fp) = fingerprint {
            let hit = inner.fingerprints.get(&fp).copied();
            if let Some((fp_owner, fp_file)) = hit {
                if Self::file_is_live(&mut inner, fp_owner, fp_file, now) {
                    tracing::debug!(owner, file_id = fp_file, "duplicate content detected");
                    return Ok(CodeIssue::Duplicate { file_id: fp_file });
                }
                // stale fingerprint from a fully-terminal file
                inner.fingerprints.remove(&fp);
            }
        }

        let code = self.generate_lookup(&inner)?;
        let lookup = code.lookup().to_string();
        let file_id = inner.next_file_id;
        inner.next_file_id += 1;

        inner.codes.insert(
            lookup.clone(),
            CodeRecord {
                owner,
                file_id,
                status: CodeStatus::Waiting,
                usage_limit: req.usage_limit,
                used_count: 0,
                expires_at,
                sessions: HashSet::new(),
            },
        );
        inner.files.insert(
            (owner, file_id),
            FileEntry {
                fingerprint,
                lookups: vec![lookup],
            },
        );
        if let Some(fp) = fingerprint {
            inner.fingerprints.insert(fp, (owner, file_id));
        }

        tracing::info!(owner, file_id, code = %code, "issued pickup code");
        Ok(CodeIssue::Issued(IssuedCode {
            code,
            file_id,
            expires_at,
            reused: false,
        }))
    }

    /// A file is live while at least one of its codes is non-terminal.
    fn file_is_live(inner: &mut Inner, owner: OwnerId, file: FileId, now: SystemTime) -> bool {
        let Some(entry) = inner.files.get(&(owner, file)) else {
            return false;
        };
        let lookups = entry.lookups.clone();
        let mut live = false;
        for lookup in &lookups {
            if let Some(record) = inner.codes.get_mut(lookup) {
                record.apply_expiry(now);
                if !record.status.is_terminal() {
                    live = true;
                }
            }
        }
        live
    }

    /// Sender-side resolution: the record must exist, belong to `owner`, and
    /// still be writable (waiting or transferring).
    pub fn sender_record(
        &self,
        owner: OwnerId,
        lookup: &str,
    ) -> RelayResult<(FileId, SystemTime)> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        let record = inner.codes.get_mut(lookup).ok_or(RelayError::CodeNotFound)?;
        if record.owner != owner {
            return Err(RelayError::CodeNotFound);
        }
        record.apply_expiry(now);
        match record.status {
            CodeStatus::Waiting | CodeStatus::Transferring => {
                Ok((record.file_id, record.expires_at))
            }
            CodeStatus::Expired => Err(RelayError::CodeExpired),
            CodeStatus::Completed => Err(RelayError::CodeCompleted),
            CodeStatus::Invalidated => Err(RelayError::CodeInvalidated),
        }
    }

    /// Flip a code receivable once its upload is verified complete.
    pub fn mark_receivable(&self, owner: OwnerId, lookup: &str) -> RelayResult<()> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        let record = inner.codes.get_mut(lookup).ok_or(RelayError::CodeNotFound)?;
        if record.owner != owner {
            return Err(RelayError::CodeNotFound);
        }
        record.apply_expiry(now);
        match record.status {
            CodeStatus::Waiting => {
                record.status = CodeStatus::Transferring;
                Ok(())
            }
            CodeStatus::Transferring => Ok(()),
            CodeStatus::Expired => Err(RelayError::CodeExpired),
            CodeStatus::Completed => Err(RelayError::CodeCompleted),
            CodeStatus::Invalidated => Err(RelayError::CodeInvalidated),
        }
    }

    /// Receiver-side resolution. A completed code stays readable for a
    /// receiver holding an open session, so a download that fetched the key
    /// under the limit can finish even if the limit is reached meanwhile.
    pub fn receiver_access(
        &self,
        lookup: &str,
        session: Option<SessionId>,
    ) -> RelayResult<ResolvedCode> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        let record = inner.codes.get_mut(lookup).ok_or(RelayError::CodeNotFound)?;
        record.apply_expiry(now);
        match record.status {
            CodeStatus::Waiting | CodeStatus::Transferring => {}
            CodeStatus::Completed => {
                let in_session = session.is_some_and(|s| record.sessions.contains(&s));
                if !in_session {
                    return Err(RelayError::CodeCompleted);
                }
            }
            CodeStatus::Expired => return Err(RelayError::CodeExpired),
            CodeStatus::Invalidated => return Err(RelayError::CodeInvalidated),
        }
        Ok(ResolvedCode {
            owner: record.owner,
            file_id: record.file_id,
            status: record.status,
        })
    }

    /// Open a download session against a code. Refused once the usage limit
    /// is reached; the session id is the receiver's ticket to finish a
    /// download that outlives the limit.
    pub fn open_session(&self, lookup: &str) -> RelayResult<SessionId> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        let record = inner.codes.get_mut(lookup).ok_or(RelayError::CodeNotFound)?;
        record.apply_expiry(now);
        match record.status {
            CodeStatus::Waiting | CodeStatus::Transferring => {}
            CodeStatus::Expired => return Err(RelayError::CodeExpired),
            CodeStatus::Completed => return Err(RelayError::CodeCompleted),
            CodeStatus::Invalidated => return Err(RelayError::CodeInvalidated),
        }
        if !record.unlimited() && record.used_count >= record.usage_limit {
            return Err(RelayError::CodeCompleted);
        }
        let session = SessionId::new_v4();
        record.sessions.insert(session);
        tracing::debug!(code = lookup, %session, "opened download session");
        Ok(session)
    }

    /// Count a finished download against the code's usage limit and close
    /// its session. Reaching the limit flips the code to `completed`, which
    /// is terminal: no later event revives it.
    pub fn close_session(&self, lookup: &str, session: SessionId) -> RelayResult<UsageSummary> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        let record = inner.codes.get_mut(lookup).ok_or(RelayError::CodeNotFound)?;
        if !record.sessions.remove(&session) {
            return Err(RelayError::SessionNotFound);
        }
        record.apply_expiry(now);
        if matches!(record.status, CodeStatus::Invalidated) {
            return Err(RelayError::CodeInvalidated);
        }
        record.used_count += 1;
        if !record.unlimited()
            && record.used_count >= record.usage_limit
            && !record.status.is_terminal()
        {
            record.status = CodeStatus::Completed;
            tracing::info!(code = lookup, used = record.used_count, "usage limit reached");
        }
        Ok(UsageSummary {
            used_count: record.used_count,
            usage_limit: record.usage_limit,
            remaining: if record.unlimited() {
                None
            } else {
                Some(record.usage_limit.saturating_sub(record.used_count))
            },
            status: record.status,
        })
    }

    /// Invalidate every code issued against a file. Returns the lookups so
    /// the caller can purge their wrapped keys.
    pub fn invalidate_file(&self, owner: OwnerId, file: FileId) -> RelayResult<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .files
            .get(&(owner, file))
            .ok_or(RelayError::FileNotFound { file_id: file })?;
        let lookups = entry.lookups.clone();
        for lookup in &lookups {
            if let Some(record) = inner.codes.get_mut(lookup) {
                if !record.status.is_terminal() {
                    record.status = CodeStatus::Invalidated;
                }
            }
        }
        let fp = inner.files.get(&(owner, file)).and_then(|e| e.fingerprint);
        if let Some(fp) = fp {
            inner.fingerprints.remove(&fp);
        }
        tracing::info!(owner, file_id = file, codes = lookups.len(), "invalidated file");
        Ok(lookups)
    }

    /// Sender-facing status snapshot.
    pub fn code_status(&self, owner: OwnerId, lookup: &str) -> RelayResult<CodeStatusView> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        let record = inner.codes.get_mut(lookup).ok_or(RelayError::CodeNotFound)?;
        if record.owner != owner {
            return Err(RelayError::CodeNotFound);
        }
        record.apply_expiry(now);
        Ok(CodeStatusView {
            lookup: lookup.to_string(),
            file_id: record.file_id,
            status: record.status,
            used_count: record.used_count,
            usage_limit: record.usage_limit,
            expires_at: record.expires_at,
        })
    }

    /// Mark expired records and collect everything eligible for purging. A
    /// file's bytes are only purgeable once *every* code issued against it
    /// is terminal; an alias code still alive keeps the shared chunk set.
    /// Purged records are dropped from the registry.
    pub fn sweep(&self) -> SweepOutcome {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        let mut outcome = SweepOutcome::default();

        for record in inner.codes.values_mut() {
            if !record.status.is_terminal() && record.expires_at <= now {
                record.status = CodeStatus::Expired;
                outcome.expired_marked += 1;
            }
        }

        let owners: HashSet<OwnerId> = inner.codes.values().map(|r| r.owner).collect();
        outcome.owners = owners.into_iter().collect();

        let purgeable: Vec<(OwnerId, FileId)> = inner
            .files
            .iter()
            .filter(|((_, _), entry)| {
                entry.lookups.iter().all(|l| {
                    inner
                        .codes
                        .get(l)
                        .map_or(true, |r| r.status.is_terminal() && r.sessions.is_empty())
                })
            })
            .map(|(&key, _)| key)
            .collect();

        for (owner, file) in purgeable {
            if let Some(entry) = inner.files.remove(&(owner, file)) {
                if let Some(fp) = entry.fingerprint {
                    inner.fingerprints.remove(&fp);
                }
                for lookup in entry.lookups {
                    inner.codes.remove(&lookup);
                    outcome.purged_lookups.push((owner, lookup));
                }
            }
            outcome.purged_files.push((owner, file));
        }

        outcome
    }
}
