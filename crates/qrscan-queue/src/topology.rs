//! Broker topology: primary queue, dead-letter exchange, dead-letter queue.
//!
//! Each entity is probed first and declared only when absent. Losing a
//! declaration race to another worker counts as success. An entity that
//! exists with the wrong kind is logged and left alone. `ensure` never
//! fails: a broken dead-letter path only disables dead-lettering.

use std::collections::HashMap;

use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamInfoGroupsReply;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::QueueResult;

/// Field of the exchange hash recording its type.
const EXCHANGE_TYPE_FIELD: &str = "type";
const EXCHANGE_TYPE: &str = "direct";

/// Result of ensuring one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityState {
    /// Present before this call
    Existing,
    /// Declared by this call
    Created,
    /// Declared concurrently by someone else while this call tried
    RaceResolved,
    /// Present with a different kind than required; left untouched
    KindConflict { found: String },
    /// Could not be checked or declared
    Failed(String),
}

impl EntityState {
    /// The entity exists in the required shape.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            EntityState::Existing | EntityState::Created | EntityState::RaceResolved
        )
    }
}

/// Outcome of [`QueueTopology::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyReport {
    pub dead_letter_exchange: EntityState,
    pub dead_letter_queue: EntityState,
    pub binding: EntityState,
    /// Queue the dead-letter routing key resolves to, if bound
    pub bound_queue: Option<String>,
    pub primary_queue: EntityState,
}

impl TopologyReport {
    /// Stream dead-lettered messages go to, when the whole path works.
    pub fn dead_letter_target(&self) -> Option<&str> {
        if self.dead_letter_exchange.is_usable()
            && self.dead_letter_queue.is_usable()
            && self.binding.is_usable()
        {
            self.bound_queue.as_deref()
        } else {
            None
        }
    }
}

/// Arguments the primary queue is declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueArguments {
    pub message_ttl_ms: u64,
    pub max_length: u64,
    pub overflow: String,
    pub dead_letter_exchange: String,
    pub dead_letter_routing_key: String,
}

impl QueueArguments {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            message_ttl_ms: config.message_ttl.as_millis() as u64,
            max_length: config.max_length,
            overflow: "drop-head".to_string(),
            dead_letter_exchange: config.dead_letter_exchange.clone(),
            dead_letter_routing_key: config.dead_letter_routing_key.clone(),
        }
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("x-message-ttl", self.message_ttl_ms.to_string()),
            ("x-max-length", self.max_length.to_string()),
            ("x-overflow", self.overflow.clone()),
            ("x-dead-letter-exchange", self.dead_letter_exchange.clone()),
            (
                "x-dead-letter-routing-key",
                self.dead_letter_routing_key.clone(),
            ),
        ]
    }

    /// Names of arguments whose stored value differs from these.
    pub fn mismatches(&self, stored: &HashMap<String, String>) -> Vec<&'static str> {
        self.to_fields()
            .into_iter()
            .filter(|(key, value)| stored.get(*key).map(|v| v != value).unwrap_or(false))
            .map(|(key, _)| key)
            .collect()
    }
}

/// Declares and maintains the queue topology.
#[derive(Clone)]
pub struct QueueTopology {
    client: redis::Client,
    config: QueueConfig,
}

impl QueueTopology {
    pub fn new(client: redis::Client, config: QueueConfig) -> Self {
        Self { client, config }
    }

    /// Make sure every entity exists. Safe to call repeatedly and
    /// concurrently.
    pub async fn ensure(&self) -> TopologyReport {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Topology setup skipped, no connection: {}", e);
                let failed = EntityState::Failed(e.to_string());
                return TopologyReport {
                    dead_letter_exchange: failed.clone(),
                    dead_letter_queue: failed.clone(),
                    binding: failed.clone(),
                    bound_queue: None,
                    primary_queue: failed,
                };
            }
        };

        let dead_letter_exchange = settle_state(
            "dead-letter exchange",
            &self.config.dead_letter_exchange,
            self.ensure_exchange(&mut conn).await,
        );
        let dead_letter_queue = settle_state(
            "dead-letter queue",
            &self.config.dlq_stream_name,
            self.ensure_stream(&mut conn, &self.config.dlq_stream_name, &self.config.dlq_group)
                .await,
        );
        let (binding, bound_queue) = if dead_letter_exchange.is_usable() {
            match self.ensure_binding(&mut conn).await {
                Ok((state, target)) => (
                    settle_state("dead-letter binding", &self.config.dead_letter_routing_key, Ok(state)),
                    target,
                ),
                Err(e) => (
                    settle_state(
                        "dead-letter binding",
                        &self.config.dead_letter_routing_key,
                        Err(e),
                    ),
                    None,
                ),
            }
        } else {
            (
                EntityState::Failed("dead-letter exchange unavailable".to_string()),
                None,
            )
        };
        let primary_queue = settle_state(
            "queue",
            &self.config.stream_name,
            self.ensure_primary(&mut conn).await,
        );

        let report = TopologyReport {
            dead_letter_exchange,
            dead_letter_queue,
            binding,
            bound_queue,
            primary_queue,
        };

        match report.dead_letter_target() {
            Some(target) => info!(dead_letter_target = %target, "Queue topology ready"),
            None => warn!("Queue topology ready without dead-lettering; failed messages will be dropped"),
        }
        report
    }

    async fn key_type(conn: &mut MultiplexedConnection, key: &str) -> QueueResult<String> {
        Ok(redis::cmd("TYPE").arg(key).query_async(conn).await?)
    }

    async fn ensure_exchange(&self, conn: &mut MultiplexedConnection) -> QueueResult<EntityState> {
        let key = &self.config.dead_letter_exchange;
        match Self::key_type(conn, key).await?.as_str() {
            "hash" => Ok(EntityState::Existing),
            "none" => {
                let created: bool = conn.hset_nx(key, EXCHANGE_TYPE_FIELD, EXCHANGE_TYPE).await?;
                Ok(if created {
                    EntityState::Created
                } else {
                    EntityState::RaceResolved
                })
            }
            other => Ok(EntityState::KindConflict {
                found: other.to_string(),
            }),
        }
    }

    /// Ensure a stream and its consumer group.
    async fn ensure_stream(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        group: &str,
    ) -> QueueResult<EntityState> {
        match Self::key_type(conn, stream).await?.as_str() {
            "stream" => {
                let groups: StreamInfoGroupsReply = conn.xinfo_groups(stream).await?;
                if groups.groups.iter().any(|g| g.name == group) {
                    return Ok(EntityState::Existing);
                }
                Self::create_group(conn, stream, group).await
            }
            "none" => Self::create_group(conn, stream, group).await,
            other => Ok(EntityState::KindConflict {
                found: other.to_string(),
            }),
        }
    }

    async fn create_group(
        conn: &mut MultiplexedConnection,
        stream: &str,
        group: &str,
    ) -> QueueResult<EntityState> {
        // "0" so entries published before the group existed are consumed too
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(()) => Ok(EntityState::Created),
            Err(e) if e.code() == Some("BUSYGROUP") || e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {} on {} created concurrently", group, stream);
                Ok(EntityState::RaceResolved)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bind the routing key to the dead-letter queue.
    ///
    /// An existing binding to another queue is kept.
    async fn ensure_binding(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> QueueResult<(EntityState, Option<String>)> {
        let exchange = &self.config.dead_letter_exchange;
        let routing_key = &self.config.dead_letter_routing_key;
        let wanted = &self.config.dlq_stream_name;

        let current: Option<String> = match conn.hget(exchange, routing_key).await {
            Ok(current) => current,
            Err(e) if is_wrong_type(&e) => {
                return Ok((
                    EntityState::KindConflict {
                        found: "non-hash".to_string(),
                    },
                    None,
                ))
            }
            Err(e) => return Err(e.into()),
        };
        let (state, target) = match current {
            Some(target) => (EntityState::Existing, target),
            None => {
                let created: bool = conn.hset_nx(exchange, routing_key, wanted).await?;
                let target: Option<String> = conn.hget(exchange, routing_key).await?;
                let state = if created {
                    EntityState::Created
                } else {
                    EntityState::RaceResolved
                };
                (state, target.unwrap_or_else(|| wanted.clone()))
            }
        };

        if &target != wanted {
            warn!(
                routing_key = %routing_key,
                bound_to = %target,
                wanted = %wanted,
                "Dead-letter routing key already bound elsewhere, keeping existing binding"
            );
        }
        Ok((state, Some(target)))
    }

    /// Ensure the primary stream, its group and its declared arguments.
    async fn ensure_primary(&self, conn: &mut MultiplexedConnection) -> QueueResult<EntityState> {
        let state = self
            .ensure_stream(conn, &self.config.stream_name, &self.config.consumer_group)
            .await?;
        if !state.is_usable() {
            return Ok(state);
        }

        let key = self.config.arguments_key();
        let arguments = QueueArguments::from_config(&self.config);
        match Self::key_type(conn, &key).await?.as_str() {
            "none" => {
                let fields = arguments.to_fields();
                let mut pipe = redis::pipe();
                pipe.atomic();
                for (field, value) in &fields {
                    pipe.hset_nx(&key, *field, value).ignore();
                }
                pipe.hset_nx(&key, "declared_at", Utc::now().timestamp_millis())
                    .ignore();
                let _: () = pipe.query_async(conn).await?;
            }
            "hash" => {
                let stored: HashMap<String, String> = conn.hgetall(&key).await?;
                let mismatched = arguments.mismatches(&stored);
                if !mismatched.is_empty() {
                    warn!(
                        queue = %self.config.stream_name,
                        arguments = ?mismatched,
                        "Queue declared with different arguments, keeping existing declaration"
                    );
                }
            }
            other => warn!(key = %key, found = %other, "Queue arguments key has unexpected type"),
        }
        Ok(state)
    }

    /// Drop messages older than the TTL, then the oldest beyond max length.
    ///
    /// Returns the number of entries removed.
    pub async fn enforce_bounds(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let cutoff = Utc::now().timestamp_millis() - self.config.message_ttl.as_millis() as i64;

        let expired: u64 = if cutoff > 0 {
            redis::cmd("XTRIM")
                .arg(&self.config.stream_name)
                .arg("MINID")
                .arg("~")
                .arg(format!("{}-0", cutoff))
                .query_async(&mut conn)
                .await?
        } else {
            0
        };

        let overflow: u64 = redis::cmd("XTRIM")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .query_async(&mut conn)
            .await?;

        if expired + overflow > 0 {
            warn!(
                queue = %self.config.stream_name,
                expired,
                overflow,
                "Dropped messages beyond queue bounds"
            );
            metrics::counter!("qrscan_queue_dropped_total", "cause" => "ttl").increment(expired);
            metrics::counter!("qrscan_queue_dropped_total", "cause" => "max_length")
                .increment(overflow);
        }
        Ok(expired + overflow)
    }
}

/// The key exists with a kind the command cannot operate on.
fn is_wrong_type(err: &redis::RedisError) -> bool {
    err.code() == Some("WRONGTYPE") || err.to_string().contains("WRONGTYPE")
}

fn settle_state(what: &str, name: &str, result: QueueResult<EntityState>) -> EntityState {
    match result {
        Ok(EntityState::Created) => {
            info!("Declared {} {}", what, name);
            EntityState::Created
        }
        Ok(EntityState::KindConflict { found }) => {
            warn!(
                "{} {} exists as a {}, proceeding with the existing entity",
                what, name, found
            );
            EntityState::KindConflict { found }
        }
        Ok(state) => {
            debug!("{} {} present ({:?})", what, name, state);
            state
        }
        Err(e) => {
            warn!("Could not ensure {} {}: {}", what, name, e);
            EntityState::Failed(e.to_string())
        }
    }
}
