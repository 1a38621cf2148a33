//! Long-term semantic network builder
//!
//! Places transferred memories into a fixed categorical address space,
//! scores their importance from the association graph, applies
//! potentiation/depression to synaptic efficacy and ranks them by
//! retrieval strength.
//!
//! Betweenness and eigenvector centrality are one-hop approximations:
//! betweenness is the share of edges that bridge categories. Eigenvector
//! substitutes each direct neighbor's degree score for its centrality and
//! takes the mean, so it is never iterated to a fixed point.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::LtmConfig;
use crate::memory::scoring::{clamp_unit, elapsed_days, log_frequency, mean, recency_decay, safe_ratio};
use crate::memory::{
    AgeBucket, AssociationEdge, CentralityScores, ConsolidationOutcome, ConsolidationState,
    MemoryRecord, SemanticNode,
};

/// Namespace for hashing categories and record ids into addresses
const ADDRESS_NAMESPACE: Uuid = Uuid::from_u128(0x1d7e_a3c9_52b4_4f08_b6e1_a0d2_e55c_0a11);

/// Category assumed for outcomes that carry none
pub const UNCATEGORIZED: &str = "general";

fn stable_hash(name: &[u8]) -> u128 {
    Uuid::new_v5(&ADDRESS_NAMESPACE, name).as_u128()
}

/// 1-based region for a category
pub fn region_for(category: &str, config: &LtmConfig) -> u32 {
    let regions = config.region_count().max(1) as u128;
    (stable_hash(category.as_bytes()) % regions) as u32 + 1
}

/// 1-based address of a record within its category's region
pub fn address_for(record_id: Uuid, category: &str, config: &LtmConfig) -> (u32, u32) {
    let region = region_for(category, config);
    let size = config.region_size.max(1);
    let slot = (stable_hash(record_id.as_bytes()) % size as u128) as u32;
    ((region - 1) * size + slot + 1, region)
}

pub fn age_bucket(created_at: DateTime<Utc>, cutoff: DateTime<Utc>) -> AgeBucket {
    let days = elapsed_days(created_at, cutoff);
    if days < 1.0 {
        AgeBucket::Recent
    } else if days < 7.0 {
        AgeBucket::WeekOld
    } else if days < 30.0 {
        AgeBucket::MonthOld
    } else {
        AgeBucket::Remote
    }
}

/// Undirected adjacency over association edges
#[derive(Debug, Default)]
pub struct Adjacency {
    neighbors: HashMap<Uuid, Vec<(Uuid, f32)>>,
}

impl Adjacency {
    pub fn from_edges(edges: &[AssociationEdge]) -> Self {
        let mut adjacency = Self::default();
        for edge in edges {
            let strength = clamp_unit(edge.strength);
            adjacency
                .neighbors
                .entry(edge.key.low)
                .or_default()
                .push((edge.key.high, strength));
            adjacency
                .neighbors
                .entry(edge.key.high)
                .or_default()
                .push((edge.key.low, strength));
        }
        adjacency
    }

    pub fn degree(&self, id: Uuid) -> usize {
        self.neighbors.get(&id).map(Vec::len).unwrap_or(0)
    }

    fn neighbors(&self, id: Uuid) -> &[(Uuid, f32)] {
        self.neighbors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn degree_score(degree: usize, config: &LtmConfig) -> f32 {
    clamp_unit(safe_ratio(degree as f32, config.degree_saturation as f32, 0.0))
}

/// Centrality proxies for one node; zero degree scores zero everywhere.
///
/// `categories` maps known record ids to their semantic category; a
/// neighbor with no known category never counts as a bridge.
pub fn centrality(
    id: Uuid,
    category: &str,
    adjacency: &Adjacency,
    categories: &HashMap<Uuid, String>,
    config: &LtmConfig,
) -> CentralityScores {
    let neighbors = adjacency.neighbors(id);
    if neighbors.is_empty() {
        return CentralityScores::default();
    }
    let degree = neighbors.len();

    let bridges = neighbors
        .iter()
        .filter(|(n, _)| {
            categories
                .get(n)
                .map(|c| c.as_str() != category)
                .unwrap_or(false)
        })
        .count();

    let degree = degree_score(degree, config);
    let betweenness = clamp_unit(safe_ratio(bridges as f32, neighbors.len() as f32, 0.0));
    let closeness = clamp_unit(mean(neighbors.iter().map(|(_, s)| *s)).unwrap_or(0.0));
    let eigenvector = clamp_unit(
        mean(
            neighbors
                .iter()
                .map(|(n, _)| degree_score(adjacency.degree(*n), config)),
        )
        .unwrap_or(0.0),
    );

    CentralityScores {
        degree,
        betweenness,
        closeness,
        eigenvector,
        composite: clamp_unit(0.25 * (degree + betweenness + closeness + eigenvector)),
    }
}

/// Synaptic efficacy after long-term potentiation and depression.
///
/// Recent use potentiates by access frequency; long idleness ramps in
/// depression. Heavily used synapses change less (metaplasticity).
pub fn synaptic_efficacy(
    consolidated_strength: f32,
    record: &MemoryRecord,
    cutoff: DateTime<Utc>,
    config: &LtmConfig,
) -> f32 {
    let idle_days = elapsed_days(record.last_accessed_at, cutoff);

    let potentiation = if idle_days <= config.potentiation_window_days as f32 {
        log_frequency(record.access_count, config.frequency_saturation)
    } else {
        0.0
    };
    let depression = if idle_days > config.depression_window_days as f32 {
        clamp_unit(safe_ratio(
            idle_days - config.depression_window_days as f32,
            config.depression_ramp_days,
            1.0,
        ))
    } else {
        0.0
    };

    let delta = potentiation - depression;
    let damping = 1.0 / (1.0 + config.metaplasticity_rate * (record.access_count as f32).sqrt());
    clamp_unit(0.5 * clamp_unit(consolidated_strength) + 0.5 * (0.5 + 0.5 * delta * damping))
}

/// Maturity state; the first matching rule wins, otherwise age decides.
pub fn consolidation_state(
    age: AgeBucket,
    strength: f32,
    closeness: f32,
    efficacy: f32,
    config: &LtmConfig,
) -> ConsolidationState {
    match age {
        AgeBucket::Recent if strength >= config.episodic_min_strength => {
            ConsolidationState::Episodic
        }
        AgeBucket::WeekOld | AgeBucket::MonthOld
            if closeness >= config.consolidating_min_association =>
        {
            ConsolidationState::Consolidating
        }
        AgeBucket::Remote if efficacy >= config.schematized_min_efficacy => {
            ConsolidationState::Schematized
        }
        AgeBucket::Recent | AgeBucket::WeekOld => ConsolidationState::Episodic,
        AgeBucket::MonthOld => ConsolidationState::Consolidating,
        AgeBucket::Remote => ConsolidationState::Schematized,
    }
}

pub fn state_multiplier(state: ConsolidationState) -> f32 {
    match state {
        ConsolidationState::Schematized => 1.0,
        ConsolidationState::Consolidating => 0.7,
        ConsolidationState::Episodic => 0.4,
    }
}

/// Weighted blend of efficacy, centrality, recency, frequency and maturity
pub fn retrieval_strength(
    efficacy: f32,
    centrality: f32,
    days_since_access: f32,
    access_count: u32,
    state: ConsolidationState,
    config: &LtmConfig,
) -> f32 {
    clamp_unit(
        config.efficacy_weight * clamp_unit(efficacy)
            + config.centrality_weight * clamp_unit(centrality)
            + config.recency_weight * recency_decay(days_since_access, config.recency_tau_days)
            + config.frequency_weight * log_frequency(access_count, config.frequency_saturation)
            + config.state_weight * state_multiplier(state),
    )
}

/// A transferred memory entering the network
#[derive(Debug, Clone, Copy)]
pub struct LtmInput<'a> {
    pub outcome: &'a ConsolidationOutcome,
    pub record: &'a MemoryRecord,
}

/// Build semantic nodes for `inputs`, ranked by retrieval strength.
///
/// Nodes below the retrieval floor are kept but unranked. The result is
/// ordered by record id.
pub fn build_network(
    inputs: &[LtmInput<'_>],
    edges: &[AssociationEdge],
    categories: &HashMap<Uuid, String>,
    cutoff: DateTime<Utc>,
    config: &LtmConfig,
) -> Vec<SemanticNode> {
    let adjacency = Adjacency::from_edges(edges);

    let mut nodes: BTreeMap<Uuid, SemanticNode> = BTreeMap::new();
    for input in inputs {
        let record = input.record;
        let category = input
            .outcome
            .semantic_category
            .clone()
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        let (address, region_id) = address_for(record.id, &category, config);
        let centrality = centrality(record.id, &category, &adjacency, categories, config);
        let age = age_bucket(record.created_at, cutoff);
        let strength = input.outcome.consolidated_strength;
        let efficacy = synaptic_efficacy(strength, record, cutoff, config);
        let state = consolidation_state(age, strength, centrality.closeness, efficacy, config);
        let retrieval = retrieval_strength(
            efficacy,
            centrality.composite,
            elapsed_days(record.last_accessed_at, cutoff),
            record.access_count,
            state,
            config,
        );

        nodes.insert(
            record.id,
            SemanticNode {
                record_id: record.id,
                address,
                region_id,
                semantic_category: category,
                centrality,
                synaptic_efficacy: efficacy,
                consolidation_state: state,
                retrieval_strength: retrieval,
                age_bucket: age,
                network_rank: None,
            },
        );
    }

    let mut ranked: Vec<(f32, Uuid)> = nodes
        .values()
        .filter(|n| n.retrieval_strength >= config.retrieval_floor)
        .map(|n| (n.retrieval_strength, n.record_id))
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    for (rank, (_, id)) in ranked.into_iter().enumerate() {
        if let Some(node) = nodes.get_mut(&id) {
            node.network_rank = Some(rank + 1);
        }
    }

    nodes.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{EdgeKey, Fate};
    use chrono::{Duration, TimeZone};

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn config() -> LtmConfig {
        LtmConfig::default()
    }

    fn outcome(record: &MemoryRecord, strength: f32, category: &str) -> ConsolidationOutcome {
        ConsolidationOutcome {
            record_id: record.id,
            episode_id: Uuid::nil(),
            fate: Fate::CorticalTransfer,
            consolidated_strength: strength,
            replay_quality: 0.8,
            semantic_gist: Some("gist".to_string()),
            semantic_category: Some(category.to_string()),
            hebbian_delta: 0.1,
            degraded: false,
        }
    }

    fn edge(a: Uuid, b: Uuid, strength: f32) -> AssociationEdge {
        AssociationEdge {
            key: EdgeKey::new(a, b).unwrap(),
            strength,
            co_activation_count: 1,
            last_activated_at: cutoff(),
        }
    }

    #[test]
    fn test_addresses_are_stable_and_in_range() {
        let c = config();
        for i in 0..200u128 {
            let id = Uuid::from_u128(i * 7919);
            let (address, region) = address_for(id, "technical", &c);
            assert!((1..=1000).contains(&address));
            assert!((1..=50).contains(&region));
            assert_eq!(address_for(id, "technical", &c), (address, region));
            assert_eq!((address - 1) / c.region_size + 1, region);
        }
        assert_eq!(region_for("technical", &c), region_for("technical", &c));
    }

    #[test]
    fn test_age_buckets() {
        let now = cutoff();
        assert_eq!(age_bucket(now - Duration::hours(3), now), AgeBucket::Recent);
        assert_eq!(age_bucket(now - Duration::days(3), now), AgeBucket::WeekOld);
        assert_eq!(age_bucket(now - Duration::days(10), now), AgeBucket::MonthOld);
        assert_eq!(age_bucket(now - Duration::days(45), now), AgeBucket::Remote);
        // Creation after the cutoff counts as brand new
        assert_eq!(age_bucket(now + Duration::days(1), now), AgeBucket::Recent);
    }

    #[test]
    fn test_zero_degree_centrality() {
        let scores = centrality(
            Uuid::new_v4(),
            "general",
            &Adjacency::default(),
            &HashMap::new(),
            &config(),
        );
        assert_eq!(scores, CentralityScores::default());
    }

    #[test]
    fn test_centrality_proxies() {
        let hub = Uuid::from_u128(1);
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(3);
        let edges = vec![edge(hub, a, 0.8), edge(hub, b, 0.4), edge(a, b, 0.5)];
        let adjacency = Adjacency::from_edges(&edges);
        let categories: HashMap<Uuid, String> = [
            (hub, "technical".to_string()),
            (a, "technical".to_string()),
            (b, "social".to_string()),
        ]
        .into_iter()
        .collect();

        let scores = centrality(hub, "technical", &adjacency, &categories, &config());
        assert!((scores.degree - 0.2).abs() < 1e-6);
        assert!((scores.betweenness - 0.5).abs() < 1e-6);
        assert!((scores.closeness - 0.6).abs() < 1e-6);
        assert!((scores.eigenvector - 0.2).abs() < 1e-6);
        assert!((scores.composite - 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_efficacy_potentiation_and_depression() {
        let c = config();
        let mut active = MemoryRecord::new("x", cutoff() - Duration::days(40));
        active.last_accessed_at = cutoff() - Duration::days(1);
        active.access_count = 50;

        let mut idle = active.clone();
        idle.last_accessed_at = cutoff() - Duration::days(90);

        let potentiated = synaptic_efficacy(0.8, &active, cutoff(), &c);
        let depressed = synaptic_efficacy(0.8, &idle, cutoff(), &c);
        assert!(potentiated > 0.65);
        assert!(depressed < 0.65);
        assert!(potentiated > depressed);
        for v in [potentiated, depressed] {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_state_rules_and_fallback() {
        let c = config();
        use ConsolidationState::*;
        assert_eq!(consolidation_state(AgeBucket::Recent, 0.9, 0.0, 0.0, &c), Episodic);
        assert_eq!(consolidation_state(AgeBucket::Recent, 0.1, 0.0, 0.0, &c), Episodic);
        assert_eq!(consolidation_state(AgeBucket::WeekOld, 0.9, 0.6, 0.0, &c), Consolidating);
        assert_eq!(consolidation_state(AgeBucket::WeekOld, 0.9, 0.1, 0.0, &c), Episodic);
        assert_eq!(consolidation_state(AgeBucket::MonthOld, 0.9, 0.1, 0.0, &c), Consolidating);
        assert_eq!(consolidation_state(AgeBucket::Remote, 0.9, 0.0, 0.7, &c), Schematized);
        assert_eq!(consolidation_state(AgeBucket::Remote, 0.9, 0.0, 0.1, &c), Schematized);
    }

    #[test]
    fn test_retrieval_ordering_property() {
        let c = config();
        let strong = retrieval_strength(0.8, 0.9, 0.5, 40, ConsolidationState::Schematized, &c);
        let weak = retrieval_strength(0.8, 0.0, 60.0, 40, ConsolidationState::Episodic, &c);
        assert!(strong > weak);
        assert!((0.0..=1.0).contains(&strong));
        assert!((0.0..=1.0).contains(&weak));
    }

    #[test]
    fn test_network_ranking_and_floor() {
        let c = LtmConfig {
            retrieval_floor: 0.5,
            ..config()
        };
        let mut hot = MemoryRecord::new("hot", cutoff() - Duration::days(60));
        hot.last_accessed_at = cutoff() - Duration::hours(2);
        hot.access_count = 60;
        let mut cold = MemoryRecord::new("cold", cutoff() - Duration::hours(2));
        cold.last_accessed_at = cutoff() - Duration::hours(2) + Duration::minutes(1);
        let mut faded = MemoryRecord::new("faded", cutoff() - Duration::days(400));
        faded.last_accessed_at = cutoff() - Duration::days(300);

        let outcomes = [
            outcome(&hot, 0.9, "technical"),
            outcome(&cold, 0.7, "technical"),
            outcome(&faded, 0.0, "social"),
        ];
        let inputs = [
            LtmInput { outcome: &outcomes[0], record: &hot },
            LtmInput { outcome: &outcomes[1], record: &cold },
            LtmInput { outcome: &outcomes[2], record: &faded },
        ];
        let edges = vec![edge(hot.id, cold.id, 0.9)];

        let nodes = build_network(&inputs, &edges, &HashMap::new(), cutoff(), &c);
        assert_eq!(nodes.len(), 3);
        assert!(nodes.windows(2).all(|w| w[0].record_id < w[1].record_id));

        let find = |id: Uuid| nodes.iter().find(|n| n.record_id == id).unwrap();
        assert_eq!(find(hot.id).network_rank, Some(1));
        assert_eq!(find(hot.id).consolidation_state, ConsolidationState::Schematized);
        assert_eq!(find(faded.id).network_rank, None);
        assert!(find(hot.id).retrieval_strength > find(cold.id).retrieval_strength);
    }
}
