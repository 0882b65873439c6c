//! Embedded cluster
//!
//! Runs several members inside one process, connected by an in-process bus.
//! Every member gets its own replicated map service.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use ripple_common::{Configuration, Member, Result};
use ripple_replicatedmap::{InProcessBus, NodeContext, ReplicatedMap, ReplicatedMapService};

/// How many members of each kind to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterOptions {
    pub data_members: usize,
    pub lite_members: usize,
}

impl ClusterOptions {
    /// Explicit counts win; without a lite count, a configuration marking the
    /// member as lite adds one lite member
    pub fn resolve(config: &Configuration, data_members: usize, lite_members: Option<usize>) -> Self {
        Self {
            data_members: data_members.max(1),
            lite_members: lite_members.unwrap_or(usize::from(config.is_lite_member())),
        }
    }
}

pub struct EmbeddedCluster {
    bus: Arc<InProcessBus>,
    members: Vec<ReplicatedMapService>,
}

impl EmbeddedCluster {
    /// Start every member. Must be called from within a Tokio runtime.
    pub fn start(config: &Configuration, options: ClusterOptions) -> Result<Self> {
        let bus = InProcessBus::new();
        let base = config.member_id().unwrap_or_else(|| "member".to_string());
        let address = config.member_address();

        let mut members = Vec::with_capacity(options.data_members + options.lite_members);
        for i in 0..options.data_members + options.lite_members {
            let lite = i >= options.data_members;
            let member = Member::new(format!("{}-{}", base, i + 1), address.clone()).lite(lite);
            let endpoint = bus.endpoint(member.id.clone());
            let service = ReplicatedMapService::new(NodeContext::new(member, config.clone(), endpoint));
            service.start()?;
            members.push(service);
        }

        info!(
            "Embedded cluster started with {} data and {} lite members",
            options.data_members, options.lite_members
        );
        Ok(Self { bus, members })
    }

    pub fn members(&self) -> &[ReplicatedMapService] {
        &self.members
    }

    pub fn data_members(&self) -> impl Iterator<Item = &ReplicatedMapService> {
        self.members.iter().filter(|m| !m.is_lite_member())
    }

    pub fn bus(&self) -> &Arc<InProcessBus> {
        &self.bus
    }

    /// Typed handles to one map on every data member
    pub fn maps(&self, name: &str) -> Result<Vec<ReplicatedMap<String, Value>>> {
        self.data_members()
            .map(|member| member.create_distributed_object(name))
            .collect()
    }

    /// Broadcast everything buffered, then wait until every member applied
    /// what it received
    pub async fn settle(&self) {
        for member in &self.members {
            member.flush_replication().await;
        }
        for member in &self.members {
            member.sync_replication().await;
        }
    }

    /// Whether every data member holds the same entries for a map
    pub fn converged(&self, name: &str) -> Result<bool> {
        let mut snapshots = Vec::new();
        for map in self.maps(name)? {
            let entries: BTreeMap<String, Value> = map.entries()?.into_iter().collect();
            snapshots.push(entries);
        }
        Ok(snapshots.windows(2).all(|pair| pair[0] == pair[1]))
    }

    /// Per-member statistics of every map, as JSON
    pub fn report(&self) -> Value {
        let members: serde_json::Map<String, Value> = self
            .members
            .iter()
            .map(|member| {
                let stats: serde_json::Map<String, Value> = member
                    .get_stats()
                    .into_iter()
                    .map(|(name, stats)| (name, serde_json::to_value(stats).unwrap_or(Value::Null)))
                    .collect();
                (member.local_member().id.to_string(), Value::Object(stats))
            })
            .collect();
        Value::Object(members)
    }

    pub fn shutdown(&self) {
        for member in &self.members {
            member.shutdown();
        }
        self.bus.close();
        info!("Embedded cluster stopped");
    }
}
