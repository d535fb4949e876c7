//! Cache keys and a fault-tolerant wrapper over [`CacheStore`].
//!
//! Keys:
//! - stage:   `stage:<command>:<stage id>:<sha256(inputs)>`
//! - command: `command:<command>:<sha256(agent, model, args, flags)>`
//!
//! `serde_json` maps are ordered, so the hashed JSON is canonical.

use std::collections::BTreeMap;
use std::sync::Arc;

use cmdflow_state::CacheStore;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::obs;
use crate::pipeline::provider::StageRequest;

#[derive(Serialize)]
struct StageKeyMaterial<'a> {
    template: &'a str,
    agent_role: &'a str,
    model: Option<&'a str>,
    args: &'a [String],
    flags: &'a BTreeMap<String, Value>,
    inputs: &'a BTreeMap<String, Value>,
}

#[derive(Serialize)]
struct CommandKeyMaterial<'a> {
    agent: &'a str,
    model: Option<&'a str>,
    args: &'a [String],
    flags: &'a BTreeMap<String, Value>,
}

fn digest<T: Serialize>(material: &T) -> String {
    // Serializing borrowed strings and ordered maps cannot fail.
    let bytes = serde_json::to_vec(material).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Key for one stage's memoized output. The attempt number is not part of it.
pub fn stage_cache_key(request: &StageRequest) -> String {
    let material = StageKeyMaterial {
        template: &request.template,
        agent_role: &request.agent_role,
        model: request.model.as_deref(),
        args: &request.args,
        flags: &request.flags,
        inputs: &request.inputs,
    };
    format!(
        "stage:{}:{}:{}",
        request.command,
        request.stage_id,
        digest(&material)
    )
}

/// Key for a whole command's memoized outputs.
pub fn command_cache_key(
    command: &str,
    agent: &str,
    model: Option<&str>,
    args: &[String],
    flags: &BTreeMap<String, Value>,
) -> String {
    let material = CommandKeyMaterial {
        agent,
        model,
        args,
        flags,
    };
    format!("command:{command}:{}", digest(&material))
}

/// Optional cache store whose failures degrade to misses.
#[derive(Clone, Default)]
pub struct CacheLayer {
    store: Option<Arc<dyn CacheStore>>,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A layer without a backing store: every lookup misses.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn get(&self, scope: &str, key: &str) -> Option<Value> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(Some(value)) => {
                obs::emit_cache_hit(scope, key);
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                obs::emit_cache_error(key, &e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Value) {
        if let Some(store) = &self.store {
            if let Err(e) = store.set(key, value).await {
                obs::emit_cache_error(key, &e);
            }
        }
    }
}
