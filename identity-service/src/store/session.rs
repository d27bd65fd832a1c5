use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::Script;
use service_core::redis::SharedRedis;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{lock_poisoned, StoreError};
use crate::clock::Clock;
use crate::models::{ClientPlatform, Session};

/// Result of presenting a refresh token id for rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The presented id was current; the session now honours the next id.
    Rotated(Session),
    /// The presented id was stale. The session has been revoked.
    ReuseDetected,
    Revoked,
    NotFound,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    /// Returns `None` for unknown or expired sessions. Revoked sessions are
    /// returned with `revoked` set.
    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Atomically compares the current refresh id with `presented_jti` and
    /// either advances it to `next_jti` or revokes the session. A session
    /// owned by another user is `NotFound`.
    async fn rotate(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        presented_jti: Uuid,
        next_jti: Uuid,
        next_expiry: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError>;

    /// Returns whether a live session was revoked by this call.
    async fn revoke(&self, session_id: Uuid) -> Result<bool, StoreError>;

    /// Returns the number of sessions revoked by this call.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

const SESSION_PREFIX: &str = "session:";
const USER_SESSIONS_PREFIX: &str = "user_sessions:";

fn session_key(session_id: Uuid) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

fn user_sessions_key(user_id: Uuid) -> String {
    format!("{}{}", USER_SESSIONS_PREFIX, user_id)
}

// KEYS[1] session hash, KEYS[2] user index (zset scored by expiry)
// ARGV[1] session id, ARGV[2] expiry ms, ARGV[3..] hash field/value pairs
const CREATE_SCRIPT: &str = r"
redis.call('HSET', KEYS[1], unpack(ARGV, 3))
redis.call('PEXPIREAT', KEYS[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
local top = redis.call('ZRANGE', KEYS[2], -1, -1, 'WITHSCORES')
redis.call('PEXPIREAT', KEYS[2], top[2])
return 1
";

// KEYS[1] session hash, KEYS[2] user index
// ARGV[1] presented jti, ARGV[2] next jti, ARGV[3] next expiry ms,
// ARGV[4] session id, ARGV[5] user id
const ROTATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {'not_found'}
end
if redis.call('HGET', KEYS[1], 'user_id') ~= ARGV[5] then
  return {'not_found'}
end
if redis.call('HGET', KEYS[1], 'revoked') == '1' then
  return {'revoked'}
end
if redis.call('HGET', KEYS[1], 'current_jti') ~= ARGV[1] then
  redis.call('HSET', KEYS[1], 'revoked', '1')
  return {'reuse'}
end
redis.call('HSET', KEYS[1], 'current_jti', ARGV[2], 'expires_at', ARGV[3])
redis.call('PEXPIREAT', KEYS[1], ARGV[3])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
local top = redis.call('ZRANGE', KEYS[2], -1, -1, 'WITHSCORES')
redis.call('PEXPIREAT', KEYS[2], top[2])
local fields = redis.call('HGETALL', KEYS[1])
table.insert(fields, 1, 'rotated')
return fields
";

// KEYS[1] session hash
const REVOKE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
if redis.call('HGET', KEYS[1], 'revoked') == '1' then
  return 0
end
redis.call('HSET', KEYS[1], 'revoked', '1')
return 1
";

// KEYS[1] user index, KEYS[2..] session hashes; ARGV[1] now ms
const REVOKE_ALL_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local revoked = 0
for i = 2, #KEYS do
  if redis.call('EXISTS', KEYS[i]) == 1 and redis.call('HGET', KEYS[i], 'revoked') ~= '1' then
    redis.call('HSET', KEYS[i], 'revoked', '1')
    revoked = revoked + 1
  end
end
return revoked
";

/// Sessions as Redis hashes (`session:{id}`) expiring with the session, plus a
/// per-user index (`user_sessions:{user_id}`) for revoke-all. Every
/// read-modify-write runs as one Lua script, and every key a script touches
/// is passed in `KEYS`.
///
/// A session hash and its user index hash to different cluster slots, so the
/// store targets a single Redis node (or a Sentinel-managed primary).
pub struct RedisSessionStore {
    redis: Arc<SharedRedis>,
    clock: Arc<dyn Clock>,
    create: Script,
    rotate: Script,
    revoke: Script,
    revoke_all: Script,
}

impl RedisSessionStore {
    pub fn new(redis: Arc<SharedRedis>, clock: Arc<dyn Clock>) -> Self {
        Self {
            redis,
            clock,
            create: Script::new(CREATE_SCRIPT),
            rotate: Script::new(ROTATE_SCRIPT),
            revoke: Script::new(REVOKE_SCRIPT),
            revoke_all: Script::new(REVOKE_ALL_SCRIPT),
        }
    }
}

fn rotate_keys(session_id: Uuid, user_id: Uuid) -> [String; 2] {
    [session_key(session_id), user_sessions_key(user_id)]
}

fn revoke_all_keys(user_id: Uuid, session_ids: &[String]) -> Vec<String> {
    std::iter::once(user_sessions_key(user_id))
        .chain(
            session_ids
                .iter()
                .map(|id| format!("{}{}", SESSION_PREFIX, id)),
        )
        .collect()
}

fn encode_session(session: &Session) -> Vec<(&'static str, String)> {
    vec![
        ("user_id", session.user_id.to_string()),
        ("issued_at", session.issued_at.timestamp_millis().to_string()),
        ("expires_at", session.expires_at.timestamp_millis().to_string()),
        ("revoked", if session.revoked { "1" } else { "0" }.to_string()),
        ("current_jti", session.current_jti.to_string()),
        ("platform", session.platform.as_str().to_string()),
        ("remember_me", if session.remember_me { "1" } else { "0" }.to_string()),
    ]
}

fn decode_session(session_id: Uuid, fields: &HashMap<String, String>) -> Result<Session, StoreError> {
    fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str, StoreError> {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| StoreError::Corrupt(format!("session field {} missing", name)))
    }

    fn uuid(fields: &HashMap<String, String>, name: &str) -> Result<Uuid, StoreError> {
        Uuid::parse_str(field(fields, name)?)
            .map_err(|e| StoreError::Corrupt(format!("session field {}: {}", name, e)))
    }

    fn millis(fields: &HashMap<String, String>, name: &str) -> Result<DateTime<Utc>, StoreError> {
        field(fields, name)?
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| StoreError::Corrupt(format!("session field {} is not a timestamp", name)))
    }

    Ok(Session {
        session_id,
        user_id: uuid(fields, "user_id")?,
        issued_at: millis(fields, "issued_at")?,
        expires_at: millis(fields, "expires_at")?,
        revoked: field(fields, "revoked")? == "1",
        current_jti: uuid(fields, "current_jti")?,
        platform: field(fields, "platform")?
            .parse::<ClientPlatform>()
            .map_err(StoreError::Corrupt)?,
        remember_me: field(fields, "remember_me")? == "1",
    })
}

fn pairs_to_map(flat: &[String]) -> HashMap<String, String> {
    flat.chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let mut conn = self.redis.connection().await?;
        let mut invocation = self.create.prepare_invoke();
        invocation
            .key(session_key(session.session_id))
            .key(user_sessions_key(session.user_id))
            .arg(session.session_id.to_string())
            .arg(session.expires_at.timestamp_millis());
        for (name, value) in encode_session(session) {
            invocation.arg(name).arg(value);
        }
        invocation.invoke_async::<_, i64>(&mut conn).await?;

        tracing::debug!(session_id = %session.session_id, user_id = %session.user_id, "Session stored");
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let mut conn = self.redis.connection().await?;
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(session_key(session_id))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }

        let session = decode_session(session_id, &fields)?;
        if session.is_expired(self.clock.now()) {
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn rotate(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        presented_jti: Uuid,
        next_jti: Uuid,
        next_expiry: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError> {
        let mut conn = self.redis.connection().await?;
        let [session, index] = rotate_keys(session_id, user_id);
        let reply: Vec<String> = self
            .rotate
            .key(session)
            .key(index)
            .arg(presented_jti.to_string())
            .arg(next_jti.to_string())
            .arg(next_expiry.timestamp_millis())
            .arg(session_id.to_string())
            .arg(user_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        match reply.split_first() {
            Some((status, fields)) if status == "rotated" => {
                let session = decode_session(session_id, &pairs_to_map(fields))?;
                Ok(RotationOutcome::Rotated(session))
            }
            Some((status, _)) if status == "reuse" => Ok(RotationOutcome::ReuseDetected),
            Some((status, _)) if status == "revoked" => Ok(RotationOutcome::Revoked),
            Some((status, _)) if status == "not_found" => Ok(RotationOutcome::NotFound),
            _ => Err(StoreError::Corrupt(format!(
                "unexpected rotation reply: {:?}",
                reply.first()
            ))),
        }
    }

    async fn revoke(&self, session_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.redis.connection().await?;
        let revoked: i64 = self
            .revoke
            .key(session_key(session_id))
            .invoke_async(&mut conn)
            .await?;
        Ok(revoked == 1)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let mut conn = self.redis.connection().await?;
        let now_ms = self.clock.timestamp_millis();
        // Sessions created after this read belong to a later login.
        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(user_sessions_key(user_id))
            .arg(format!("({}", now_ms))
            .arg("+inf")
            .query_async(&mut conn)
            .await?;

        let mut invocation = self.revoke_all.prepare_invoke();
        for key in revoke_all_keys(user_id, &ids) {
            invocation.key(key);
        }
        let revoked: i64 = invocation.arg(now_ms).invoke_async(&mut conn).await?;
        Ok(usize::try_from(revoked).unwrap_or(0))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.redis.health_check().await.map_err(StoreError::from)
    }
}

/// Process-local session store. Expiry follows the injected clock.
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .map_err(lock_poisoned)?
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let now = self.clock.now();
        let sessions = self.sessions.lock().map_err(lock_poisoned)?;
        Ok(sessions
            .get(&session_id)
            .filter(|s| !s.is_expired(now))
            .cloned())
    }

    async fn rotate(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        presented_jti: Uuid,
        next_jti: Uuid,
        next_expiry: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().map_err(lock_poisoned)?;
        let session = match sessions.get_mut(&session_id) {
            Some(s) if !s.is_expired(now) && s.user_id == user_id => s,
            _ => return Ok(RotationOutcome::NotFound),
        };

        if session.revoked {
            return Ok(RotationOutcome::Revoked);
        }
        if session.current_jti != presented_jti {
            session.revoked = true;
            return Ok(RotationOutcome::ReuseDetected);
        }

        session.current_jti = next_jti;
        session.expires_at = next_expiry;
        Ok(RotationOutcome::Rotated(session.clone()))
    }

    async fn revoke(&self, session_id: Uuid) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().map_err(lock_poisoned)?;
        match sessions.get_mut(&session_id) {
            Some(s) if s.is_live(now) => {
                s.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().map_err(lock_poisoned)?;
        let mut revoked = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.is_live(now) {
                session.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
