//! History export
//!
//! Produces the external JSON contract consumed by the CLI `export`
//! subcommand and the read-only visualiser. Per-node retrievability is
//! computed at export time with the store's scheduler; graph geometry
//! (radius, group) is display-only.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::{ActionType, NodeRecord};
use crate::storage::Store;
use crate::time::TimePoint;

/// Document metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMetadata {
    /// Topic the export was filtered or labelled with
    pub topic: String,
    /// Date of the newest recorded interaction, export date when none
    pub date: String,
    /// When the export ran
    pub exported_at: String,
}

/// One displayed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Entity identifier
    pub id: String,
    /// Display radius, grows with stability
    pub radius: f64,
    /// Recall probability at export time
    pub retrievability: f64,
    /// Memory stability in days
    pub stability: f64,
    /// 1 for the agent's first-person node, 2 otherwise
    pub group: u32,
}

/// One displayed edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    /// Subject entity
    pub source: String,
    /// Object entity
    pub target: String,
    /// Relation label
    pub label: String,
}

/// One agent's full graph
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentGraph {
    /// Entities
    pub nodes: Vec<GraphNode>,
    /// Triples
    pub links: Vec<GraphLink>,
}

/// One step of the interaction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStep {
    /// Ordinal, starting at 1
    pub step: u32,
    /// Simulation day of the interaction, 0 for wall-clock records
    pub round: u32,
    /// Action tag of the underlying log record
    pub action: String,
    /// Graph snapshot per agent involved
    pub graphs: BTreeMap<String, AgentGraph>,
}

/// The exported history document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    /// Topic, date, export time
    pub metadata: HistoryMetadata,
    /// Every agent in the store
    pub agents: Vec<String>,
    /// Write interactions in commit order
    pub steps: Vec<HistoryStep>,
}

/// Latest same-axis reference times among a set of nodes
fn latest_reviews(nodes: &[NodeRecord]) -> (Option<TimePoint>, Option<TimePoint>) {
    let mut latest_absolute: Option<TimePoint> = None;
    let mut latest_round: Option<TimePoint> = None;
    for node in nodes {
        let Some(review) = node.memory.last_review else {
            continue;
        };
        let slot = match review {
            TimePoint::Absolute { .. } => &mut latest_absolute,
            TimePoint::Round { .. } => &mut latest_round,
        };
        let newer = slot
            .map(|cur| review.as_fractional_days() > cur.as_fractional_days())
            .unwrap_or(true);
        if newer {
            *slot = Some(review);
        }
    }
    (latest_absolute, latest_round)
}

impl Store {
    /// Build the history document for the whole store
    pub fn export_history(&self, topic: &str) -> Result<HistoryDocument> {
        let agents = self.list_owners()?;
        let mut graphs: BTreeMap<String, AgentGraph> = BTreeMap::new();
        let mut newest_date: Option<String> = None;

        for owner in &agents {
            let nodes = self.list_nodes(owner)?;
            let edges = self.list_edges(owner)?;
            let (latest_absolute, latest_round) = latest_reviews(&nodes);

            let graph_nodes = nodes
                .iter()
                .map(|node| {
                    // Probe recall at the newest same-axis review time, so
                    // absolute and round histories never mix on one axis
                    let now = match node.memory.last_review {
                        Some(TimePoint::Absolute { .. }) => latest_absolute,
                        Some(TimePoint::Round { .. }) => latest_round,
                        None => None,
                    };
                    let retrievability = match now {
                        Some(now) => self.scheduler().retrievability(&node.memory, &now),
                        None => 1.0,
                    };
                    GraphNode {
                        id: node.id.clone(),
                        radius: 4.0 + 3.0 * (1.0 + node.memory.stability).ln(),
                        retrievability,
                        stability: node.memory.stability,
                        group: if node.id == crate::agents::FIRST_PERSON || node.id == *owner {
                            1
                        } else {
                            2
                        },
                    }
                })
                .collect();

            let links = edges
                .iter()
                .map(|edge| GraphLink {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    label: edge.relation.clone(),
                })
                .collect();

            graphs.insert(owner.clone(), AgentGraph { nodes: graph_nodes, links });
        }

        let mut steps = Vec::new();
        let mut records = Vec::new();
        for owner in &agents {
            records.extend(self.iter_log(owner, None, None)?);
        }
        records.sort_by_key(|r| r.id);

        for record in &records {
            if let TimePoint::Absolute { instant } = record.at {
                newest_date = Some(instant.format("%Y-%m-%d").to_string());
            }
            if record.action != ActionType::Write {
                continue;
            }
            let mut step_graphs = BTreeMap::new();
            if let Some(graph) = graphs.get(&record.agent) {
                step_graphs.insert(record.agent.clone(), graph.clone());
            }
            steps.push(HistoryStep {
                step: steps.len() as u32 + 1,
                round: record.at.round_parts().map(|(day, _)| day).unwrap_or(0),
                action: record.action.as_str().to_string(),
                graphs: step_graphs,
            });
        }

        let exported_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        Ok(HistoryDocument {
            metadata: HistoryMetadata {
                topic: topic.to_string(),
                date: newest_date.unwrap_or_else(|| exported_at[..10].to_string()),
                exported_at,
            },
            agents,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::fsrs::Rating;
    use crate::learner::LearnRequest;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        let path = dir.path().join("kg.db");
        Store::open(StoreConfig::new(format!("sqlite://{}", path.display()))).unwrap()
    }

    fn round(day: u32, hour: u32) -> TimePoint {
        TimePoint::round(day, hour).unwrap()
    }

    #[test]
    fn export_reflects_store_contents() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .learn(
                "Alice",
                LearnRequest::new("I", "support", "UBI", round(1, 9))
                    .rating(Rating::Easy)
                    .sentiment(0.8),
            )
            .unwrap();

        let doc = store.export_history("UBI").unwrap();
        assert_eq!(doc.metadata.topic, "UBI");
        assert_eq!(doc.agents, vec!["Alice".to_string()]);
        assert_eq!(doc.steps.len(), 1);
        assert_eq!(doc.steps[0].step, 1);
        assert_eq!(doc.steps[0].round, 1);
        assert_eq!(doc.steps[0].action, "write");

        let graph = &doc.steps[0].graphs["Alice"];
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.links.len(), 1);
        assert_eq!(graph.links[0].label, "support");

        let me = graph.nodes.iter().find(|n| n.id == "I").unwrap();
        assert_eq!(me.group, 1);
        assert_eq!(me.stability, 8.2956);
        // Probed at its own review time: fully fresh
        assert!((me.retrievability - 1.0).abs() < 1e-9);
        let topic_node = graph.nodes.iter().find(|n| n.id == "UBI").unwrap();
        assert_eq!(topic_node.group, 2);
    }

    #[test]
    fn retrievability_decays_between_reviews() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .learn("Alice", LearnRequest::new("I", "support", "UBI", round(1, 9)))
            .unwrap();
        // A later write moves the owner's latest review time forward
        store
            .learn("Alice", LearnRequest::new("I", "ponders", "taxes", round(9, 9)))
            .unwrap();

        let doc = store.export_history("").unwrap();
        let graph = &doc.steps[0].graphs["Alice"];
        let ubi = graph.nodes.iter().find(|n| n.id == "UBI").unwrap();
        assert!(ubi.retrievability < 1.0);
        assert!(ubi.retrievability > 0.0);
    }

    #[test]
    fn document_round_trips_through_json() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .learn("Alice", LearnRequest::new("I", "support", "UBI", round(1, 9)))
            .unwrap();
        store
            .learn("Bob", LearnRequest::new("I", "opposes", "UBI", round(2, 3)))
            .unwrap();

        let doc = store.export_history("UBI").unwrap();
        let json = serde_json::to_string_pretty(&doc).unwrap();
        let back: HistoryDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);

        // Re-export differs at most in the export timestamp
        let again = store.export_history("UBI").unwrap();
        assert_eq!(doc.agents, again.agents);
        assert_eq!(doc.steps, again.steps);
        assert_eq!(doc.metadata.topic, again.metadata.topic);
    }
}
