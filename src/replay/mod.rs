//! Call-replay cache.
//!
//! Implements:
//! - Per-call-site memos: ordered logs of recorded call → response pairs
//! - Strict and loose replay policies with a monotonic cursor
//! - The execution [`Context`]: all memos plus the evolving state
//! - Compressed, integrity-checked context archives

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::ScenarioConfig;
use crate::error::{ScenarioError, ScenarioResult};
use crate::state::State;

/// How a recorded entry is validated before it is replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachingPolicy {
    /// The live call must match the recorded one exactly.
    #[default]
    Strict,
    /// The recorded response is returned whatever the live call was.
    Loose,
}

/// Whether a context records live answers or replays recorded ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// Answer from the state and append to the memo.
    #[default]
    Record,
    /// Answer from the memo according to its policy.
    Replay,
}

/// Identity of one outbound call: its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSignature {
    /// Call arguments.
    pub args: Vec<Value>,
}

impl CallSignature {
    /// Create a signature from arguments.
    #[must_use]
    pub fn new(args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            args: args.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for CallSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.args) {
            Ok(rendered) => f.write_str(&rendered),
            Err(_) => write!(f, "{:?}", self.args),
        }
    }
}

/// One recorded call and the response it got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedCall {
    /// Call signature.
    pub signature: CallSignature,
    /// Recorded response.
    pub response: Value,
}

/// Recorded interactions of one call site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    /// Recorded calls, in order.
    #[serde(default)]
    pub calls: Vec<RecordedCall>,
    /// Replay position.
    #[serde(default)]
    pub cursor: usize,
    /// Replay policy.
    #[serde(default)]
    pub caching_policy: CachingPolicy,
}

impl Memo {
    /// Create an empty memo with the given policy.
    #[must_use]
    pub const fn new(caching_policy: CachingPolicy) -> Self {
        Self {
            calls: Vec::new(),
            cursor: 0,
            caching_policy,
        }
    }

    /// Create a memo from recorded `(signature, response)` pairs.
    #[must_use]
    pub fn from_calls(
        calls: impl IntoIterator<Item = (CallSignature, Value)>,
        caching_policy: CachingPolicy,
    ) -> Self {
        Self {
            calls: calls
                .into_iter()
                .map(|(signature, response)| RecordedCall { signature, response })
                .collect(),
            cursor: 0,
            caching_policy,
        }
    }

    /// Append a live call and advance the cursor past it.
    pub fn record(&mut self, signature: CallSignature, response: Value) {
        self.calls.push(RecordedCall { signature, response });
        self.cursor = self.calls.len();
    }

    /// Answer `signature` from the entry at the cursor.
    ///
    /// Returns `Ok(None)` when a loose memo has run out of entries; the
    /// caller picks the fallback response. The cursor only moves when an
    /// entry is answered.
    ///
    /// # Errors
    ///
    /// Under the strict policy, returns `ReplayMismatch` if the live call
    /// differs from the recorded one and `ReplayExhausted` if the log has
    /// no entry left. `call_site` only labels the error.
    pub fn replay(
        &mut self,
        call_site: &str,
        signature: &CallSignature,
    ) -> ScenarioResult<Option<Value>> {
        let Some(entry) = self.calls.get(self.cursor) else {
            return match self.caching_policy {
                CachingPolicy::Strict => Err(ScenarioError::ReplayExhausted {
                    call_site: call_site.to_string(),
                    cursor: self.cursor,
                }),
                CachingPolicy::Loose => {
                    trace!(call_site, cursor = self.cursor, "loose memo exhausted");
                    Ok(None)
                }
            };
        };

        if self.caching_policy == CachingPolicy::Strict && entry.signature != *signature {
            return Err(ScenarioError::ReplayMismatch {
                call_site: call_site.to_string(),
                cursor: self.cursor,
                expected: entry.signature.to_string(),
                actual: signature.to_string(),
            });
        }

        let response = entry.response.clone();
        self.cursor += 1;
        trace!(call_site, cursor = self.cursor, "replayed call");
        Ok(Some(response))
    }

    /// Number of recorded entries not yet replayed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.calls.len().saturating_sub(self.cursor)
    }
}

/// Everything one execution needs to answer outbound calls.
///
/// A context is owned by exactly one execution. It also owns the change-id
/// counter used for mocked process runs, so ids restart with every context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Memos keyed by call site.
    #[serde(default)]
    pub memos: BTreeMap<String, Memo>,
    /// State being evolved.
    #[serde(default)]
    pub state: State,
    /// Record or replay.
    #[serde(default = "replay_mode")]
    pub mode: CallMode,
    /// Policy given to memos created while recording.
    #[serde(default)]
    pub default_policy: CachingPolicy,
    #[serde(skip)]
    change_ids: u64,
}

const fn replay_mode() -> CallMode {
    CallMode::Replay
}

impl Context {
    /// Create a recording context around a state.
    #[must_use]
    pub fn new(state: State) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Create a context with mode and policy taken from configuration.
    #[must_use]
    pub fn from_config(state: State, config: &ScenarioConfig) -> Self {
        Self {
            state,
            mode: config.replay.mode,
            default_policy: config.replay.caching_policy,
            ..Self::default()
        }
    }

    /// Copy with the mode replaced.
    #[must_use]
    pub fn with_mode(&self, mode: CallMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    /// Copy with one memo inserted.
    #[must_use]
    pub fn with_memo(&self, call_site: impl Into<String>, memo: Memo) -> Self {
        let mut next = self.clone();
        next.memos.insert(call_site.into(), memo);
        next
    }

    /// Copy with the state replaced.
    #[must_use]
    pub fn with_state(&self, state: State) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    /// Copy set up to replay everything recorded so far from the start.
    #[must_use]
    pub fn rewound(&self) -> Self {
        let mut next = self.clone();
        next.mode = CallMode::Replay;
        next.change_ids = 0;
        for memo in next.memos.values_mut() {
            memo.cursor = 0;
        }
        next
    }

    /// Answer one outbound call made at `call_site`.
    ///
    /// Recording: `live` answers and the pair is appended. Replaying: the
    /// memo answers; a loose memo past its end falls back to `live`
    /// without recording, and a site with no memo replays as an empty log
    /// under the default policy without gaining an entry in `memos`.
    ///
    /// # Errors
    ///
    /// Propagates replay failures and errors from `live`.
    pub fn answer<F>(
        &mut self,
        call_site: &str,
        signature: CallSignature,
        live: F,
    ) -> ScenarioResult<Value>
    where
        F: FnOnce() -> ScenarioResult<Value>,
    {
        match self.mode {
            CallMode::Record => {
                let response = live()?;
                debug!(call_site, %signature, "recording call");
                let policy = self.default_policy;
                self.memos
                    .entry(call_site.to_string())
                    .or_insert_with(|| Memo::new(policy))
                    .record(signature, response.clone());
                Ok(response)
            }
            CallMode::Replay => {
                let replayed = match self.memos.get_mut(call_site) {
                    Some(memo) => memo.replay(call_site, &signature)?,
                    None => Memo::new(self.default_policy).replay(call_site, &signature)?,
                };
                match replayed {
                    Some(response) => Ok(response),
                    None => live(),
                }
            }
        }
    }

    /// Allocate the next change id.
    pub fn next_change_id(&mut self) -> u64 {
        self.change_ids += 1;
        self.change_ids
    }

    /// Serialize to the persisted mapping shape.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_dict(&self) -> ScenarioResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Restore from the persisted mapping shape. `null` yields an empty
    /// replaying context.
    ///
    /// # Errors
    ///
    /// Returns error if the mapping does not describe a context.
    pub fn from_dict(value: Value) -> ScenarioResult<Self> {
        if value.is_null() {
            return Ok(Self {
                mode: CallMode::Replay,
                ..Self::default()
            });
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Compressed context snapshot with an integrity hash.
#[derive(Debug, Clone)]
pub struct ContextArchive {
    /// Blake3 hash of `data`.
    pub hash: [u8; 32],
    /// Zstd-compressed JSON of the context.
    pub data: Vec<u8>,
}

impl ContextArchive {
    /// Compress a context.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or compression fails.
    pub fn create(context: &Context, compression_level: i32) -> ScenarioResult<Self> {
        let serialized = serde_json::to_vec(context)?;
        let data = zstd::encode_all(&serialized[..], compression_level)?;
        let hash = *blake3::hash(&data).as_bytes();
        Ok(Self { hash, data })
    }

    /// Compress a context at the level set in `config.replay`.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or compression fails.
    pub fn from_config(context: &Context, config: &ScenarioConfig) -> ScenarioResult<Self> {
        Self::create(context, config.replay.compression_level)
    }

    /// Verify and decompress.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveIntegrity` if the hash does not match, or error if
    /// decompression or deserialization fails.
    pub fn restore(&self) -> ScenarioResult<Context> {
        if blake3::hash(&self.data).as_bytes() != &self.hash {
            return Err(ScenarioError::ArchiveIntegrity);
        }
        let decompressed = zstd::decode_all(&self.data[..])?;
        Ok(serde_json::from_slice(&decompressed)?)
    }

    /// Write hash then payload to `path`.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure.
    pub fn save(&self, path: impl AsRef<Path>) -> ScenarioResult<()> {
        let mut bytes = Vec::with_capacity(self.hash.len() + self.data.len());
        bytes.extend_from_slice(&self.hash);
        bytes.extend_from_slice(&self.data);
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Read an archive written by [`ContextArchive::save`].
    ///
    /// # Errors
    ///
    /// Returns `ArchiveIntegrity` if the file is too short to hold a hash,
    /// or error on I/O failure.
    pub fn load(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 32 {
            return Err(ScenarioError::ArchiveIntegrity);
        }
        let (head, data) = bytes.split_at(32);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(head);
        Ok(Self {
            hash,
            data: data.to_vec(),
        })
    }

    /// Compressed size in bytes.
    #[must_use]
    pub fn compressed_size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sig(name: &str) -> CallSignature {
        CallSignature::new([json!(name)])
    }

    fn abc(policy: CachingPolicy) -> Memo {
        Memo::from_calls(
            [
                (sig("A"), json!(1)),
                (sig("B"), json!(2)),
                (sig("C"), json!(3)),
            ],
            policy,
        )
    }

    #[test]
    fn test_strict_replay_in_order() {
        let mut memo = abc(CachingPolicy::Strict);
        let responses: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|name| memo.replay("site", &sig(name)).unwrap())
            .collect();
        assert_eq!(responses, vec![Some(json!(1)), Some(json!(2)), Some(json!(3))]);
        assert_eq!(memo.cursor, 3);
        assert_eq!(memo.remaining(), 0);
    }

    #[test]
    fn test_strict_mismatch_keeps_cursor() {
        let mut memo = abc(CachingPolicy::Strict);
        assert_eq!(memo.replay("site", &sig("A")).unwrap(), Some(json!(1)));
        let err = memo.replay("site", &sig("X")).unwrap_err();
        match err {
            ScenarioError::ReplayMismatch {
                call_site,
                cursor,
                expected,
                actual,
            } => {
                assert_eq!(call_site, "site");
                assert_eq!(cursor, 1);
                assert_eq!(expected, r#"["B"]"#);
                assert_eq!(actual, r#"["X"]"#);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(memo.cursor, 1);
    }

    #[test]
    fn test_strict_exhausted() {
        let mut memo = Memo::from_calls([(sig("A"), json!(1))], CachingPolicy::Strict);
        memo.replay("site", &sig("A")).unwrap();
        let err = memo.replay("site", &sig("A")).unwrap_err();
        assert!(matches!(err, ScenarioError::ReplayExhausted { cursor: 1, .. }));
    }

    #[test]
    fn test_loose_ignores_signature() {
        let mut memo = abc(CachingPolicy::Loose);
        assert_eq!(memo.replay("site", &sig("X")).unwrap(), Some(json!(1)));
        assert_eq!(memo.replay("site", &sig("Y")).unwrap(), Some(json!(2)));
        assert_eq!(memo.cursor, 2);
    }

    #[test]
    fn test_loose_exhausted_yields_none() {
        let mut memo = Memo::new(CachingPolicy::Loose);
        assert_eq!(memo.replay("site", &sig("A")).unwrap(), None);
        assert_eq!(memo.cursor, 0);
    }

    #[test]
    fn test_context_record_then_replay() {
        let mut ctx = Context::new(State::default());
        let first = ctx.answer("is-leader", sig("q"), || Ok(json!(true))).unwrap();
        assert_eq!(first, json!(true));
        assert_eq!(ctx.memos["is-leader"].calls.len(), 1);
        assert_eq!(ctx.memos["is-leader"].cursor, 1);

        let mut replay = ctx.rewound();
        assert_eq!(replay.mode, CallMode::Replay);
        let again = replay
            .answer("is-leader", sig("q"), || Ok(json!(false)))
            .unwrap();
        assert_eq!(again, json!(true));
    }

    #[test]
    fn test_context_replay_missing_site_is_strictly_empty() {
        let mut ctx = Context::new(State::default()).with_mode(CallMode::Replay);
        let err = ctx.answer("config-get", sig("q"), || Ok(json!({}))).unwrap_err();
        assert!(err.is_replay_failure());
        assert!(ctx.memos.is_empty());
    }

    #[test]
    fn test_context_replay_missing_site_loose_default() {
        let mut ctx = Context::new(State::default()).with_mode(CallMode::Replay);
        ctx.default_policy = CachingPolicy::Loose;
        let answer = ctx.answer("config-get", sig("q"), || Ok(json!({"a": 1}))).unwrap();
        assert_eq!(answer, json!({"a": 1}));
        assert!(ctx.memos.is_empty());
    }

    #[test]
    fn test_context_loose_falls_back_to_live() {
        let mut ctx = Context::new(State::default())
            .with_mode(CallMode::Replay)
            .with_memo("status-get", Memo::new(CachingPolicy::Loose));
        let answer = ctx.answer("status-get", sig("q"), || Ok(json!("live"))).unwrap();
        assert_eq!(answer, json!("live"));
        assert!(ctx.memos["status-get"].calls.is_empty());
    }

    #[test]
    fn test_change_ids_are_scoped() {
        let mut a = Context::default();
        let mut b = Context::default();
        assert_eq!(a.next_change_id(), 1);
        assert_eq!(a.next_change_id(), 2);
        assert_eq!(b.next_change_id(), 1);
    }

    #[test]
    fn test_dict_shape() {
        let ctx = Context::default().with_memo("relation-get", abc(CachingPolicy::Loose));
        let dict = ctx.to_dict().unwrap();
        assert_eq!(dict["memos"]["relation-get"]["cursor"], json!(0));
        assert_eq!(dict["memos"]["relation-get"]["caching_policy"], json!("loose"));
        assert_eq!(dict["memos"]["relation-get"]["calls"][1]["response"], json!(2));
        assert!(dict["state"].is_object());

        let back = Context::from_dict(dict).unwrap();
        assert_eq!(back.memos, ctx.memos);
        assert_eq!(back.state, ctx.state);
    }

    #[test]
    fn test_from_dict_null_and_missing_mode() {
        let empty = Context::from_dict(Value::Null).unwrap();
        assert!(empty.memos.is_empty());
        assert_eq!(empty.mode, CallMode::Replay);

        let loaded = Context::from_dict(json!({"memos": {}, "state": {}})).unwrap();
        assert_eq!(loaded.mode, CallMode::Replay);
    }

    #[test]
    fn test_archive_integrity() {
        let ctx = Context::default().with_memo("exec", abc(CachingPolicy::Strict));
        let archive = ContextArchive::create(&ctx, 3).unwrap();
        assert_eq!(archive.restore().unwrap().memos, ctx.memos);

        let config = ScenarioConfig::from_yaml("replay:\n  compression_level: 19\n").unwrap();
        let tight = ContextArchive::from_config(&ctx, &config).unwrap();
        assert_eq!(tight.restore().unwrap().memos, ctx.memos);
        assert_eq!(
            tight.data,
            zstd::encode_all(&serde_json::to_vec(&ctx).unwrap()[..], 19).unwrap()
        );

        let mut corrupted = archive;
        corrupted.data[0] ^= 0xFF;
        assert!(matches!(
            corrupted.restore(),
            Err(ScenarioError::ArchiveIntegrity)
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        /// The cursor never moves backwards, whatever the live calls are.
        #[test]
        fn prop_cursor_monotonic(
            recorded in prop::collection::vec(0u8..4, 0..12),
            live in prop::collection::vec(0u8..4, 0..16),
            loose in any::<bool>(),
        ) {
            let policy = if loose { CachingPolicy::Loose } else { CachingPolicy::Strict };
            let mut memo = Memo::from_calls(
                recorded.iter().map(|c| (CallSignature::new([json!(c)]), json!(c))),
                policy,
            );
            let mut last = memo.cursor;
            for call in live {
                let _ = memo.replay("site", &CallSignature::new([json!(call)]));
                prop_assert!(memo.cursor >= last);
                prop_assert!(memo.cursor <= recorded.len());
                last = memo.cursor;
            }
        }

        /// Loose replay answers exactly min(live, recorded) calls from the log.
        #[test]
        fn prop_loose_answers_in_order(
            recorded in prop::collection::vec(any::<u16>(), 0..10),
            live_calls in 0usize..15,
        ) {
            let mut memo = Memo::from_calls(
                recorded.iter().map(|r| (CallSignature::default(), json!(r))),
                CachingPolicy::Loose,
            );
            let answered: Vec<Value> = (0..live_calls)
                .filter_map(|i| memo.replay("site", &CallSignature::new([json!(i)])).ok().flatten())
                .collect();
            let expected: Vec<Value> = recorded.iter().take(live_calls).map(|r| json!(r)).collect();
            prop_assert_eq!(answered, expected);
        }
    }
}
