//! Per-generation telemetry records and the flat CSV exporter.

use std::collections::VecDeque;

use hashbrown::HashSet;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::genome::Genome;
use crate::streaming_stats::DecisionStats;

/// Structural and score spread across a population.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diversity {
    pub mean_nodes: f64,
    pub mean_connections: f64,
    pub connection_std: f64,
    pub score_std: f64,
}

impl Diversity {
    pub fn measure(population: &[Genome]) -> Self {
        if population.is_empty() {
            return Self::default();
        }
        let n = population.len() as f64;
        let mean_nodes = population.iter().map(|g| g.nodes.len() as f64).sum::<f64>() / n;
        let conns = population.iter().map(|g| g.enabled_count() as f64);
        let mean_connections = conns.clone().sum::<f64>() / n;
        let connection_std = (conns.map(|c| (c - mean_connections).powi(2)).sum::<f64>() / n).sqrt();

        let scores: Vec<f64> = population
            .iter()
            .filter_map(|g| g.score)
            .filter(|s| s.is_finite())
            .collect();
        let score_std = if scores.len() < 2 {
            0.0
        } else {
            let m = scores.iter().sum::<f64>() / scores.len() as f64;
            (scores.iter().map(|s| (s - m).powi(2)).sum::<f64>() / scores.len() as f64).sqrt()
        };

        Self {
            mean_nodes,
            mean_connections,
            connection_std,
            score_std,
        }
    }
}

/// Distinct assigned species ids; unassigned genomes are not counted.
pub fn distinct_species(population: &[Genome], seen: &mut HashSet<u32>) -> usize {
    seen.clear();
    seen.extend(population.iter().filter_map(|g| g.species));
    seen.len()
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TelemetrySnapshot {
    pub generation: u64,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub best_fitness: Option<f64>,
    pub population_size: usize,
    pub species_count: usize,
    pub diversity: Diversity,
    pub mean_sparsity: f64,
    pub mutation_rate: f64,
    pub simplify_mode: bool,
    pub plateau_counter: u32,
    pub collapse_streak: u32,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub decision: Option<DecisionStats>,
}

/// Bounded tail of recent snapshots; oldest dropped first.
#[derive(Debug, Clone)]
pub struct TelemetryLog {
    cap: usize,
    records: VecDeque<TelemetrySnapshot>,
}

impl TelemetryLog {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            records: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, snap: TelemetrySnapshot) {
        while self.records.len() >= self.cap {
            self.records.pop_front();
        }
        self.records.push_back(snap);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&TelemetrySnapshot> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySnapshot> + '_ {
        self.records.iter()
    }

    /// The most recent `n` records, oldest first.
    pub fn tail(&self, n: usize) -> Vec<TelemetrySnapshot> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }
}

#[cfg(feature = "serde")]
mod csv {
    use serde_json::{Map, Value};

    use super::TelemetrySnapshot;

    fn flatten(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                    flatten(&key, v, out);
                }
            }
            other => {
                out.insert(prefix.to_string(), other.clone());
            }
        }
    }

    fn cell(value: Option<&Value>) -> String {
        let raw = match value {
            None | Some(Value::Null) => return String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
        };
        escape(&raw)
    }

    fn escape(raw: &str) -> String {
        if raw.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", raw.replace('"', "\"\""))
        } else {
            raw.to_string()
        }
    }

    /// Render records as CSV. Nested groups become `group.key` columns, arrays are
    /// JSON-encoded, and a column appears only if at least one record carries it.
    pub fn to_csv(records: &[TelemetrySnapshot]) -> Result<String, serde_json::Error> {
        let mut rows = Vec::with_capacity(records.len());
        let mut columns: Vec<String> = Vec::new();
        for rec in records {
            let mut flat = Map::new();
            flatten("", &serde_json::to_value(rec)?, &mut flat);
            for k in flat.keys() {
                if !columns.iter().any(|c| c == k) {
                    columns.push(k.clone());
                }
            }
            rows.push(flat);
        }
        if let Some(pos) = columns.iter().position(|c| c == "generation") {
            let g = columns.remove(pos);
            columns.insert(0, g);
        }

        let mut out = String::new();
        out.push_str(&columns.iter().map(|c| escape(c)).collect::<Vec<_>>().join(","));
        out.push('\n');
        for row in &rows {
            let line: Vec<String> = columns.iter().map(|c| cell(row.get(c))).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(feature = "serde")]
pub use csv::to_csv;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;
    use crate::streaming_stats::EntropyStats;

    #[test]
    fn diversity_and_species() {
        let mut a = Genome::new(0, 2, 1);
        a.connect(0, 2, 1.0).unwrap();
        a.score = Some(1.0);
        a.species = Some(4);
        let mut b = Genome::new(1, 2, 1);
        b.connect(0, 2, 1.0).unwrap();
        b.connect(1, 2, 1.0).unwrap();
        b.score = Some(3.0);
        b.species = Some(4);
        let c = Genome::new(2, 2, 1);

        let pop = vec![a, b, c];
        let d = Diversity::measure(&pop);
        assert!((d.mean_nodes - 3.0).abs() < 1e-12);
        assert!((d.mean_connections - 1.0).abs() < 1e-12);
        assert!((d.score_std - 1.0).abs() < 1e-12);

        let mut seen = HashSet::new();
        assert_eq!(distinct_species(&pop, &mut seen), 1);
        assert_eq!(distinct_species(&[], &mut seen), 0);
    }

    #[test]
    fn log_keeps_bounded_tail() {
        let mut log = TelemetryLog::new(3);
        for g in 0..5 {
            log.push(TelemetrySnapshot {
                generation: g,
                ..Default::default()
            });
        }
        assert_eq!(log.len(), 3);
        let tail: Vec<u64> = log.tail(2).iter().map(|s| s.generation).collect();
        assert_eq!(tail, vec![3, 4]);
        assert_eq!(log.last().map(|s| s.generation), Some(4));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn csv_flattens_groups_and_blanks_missing_values() {
        let plain = TelemetrySnapshot {
            generation: 1,
            best_fitness: None,
            ..Default::default()
        };
        let rich = TelemetrySnapshot {
            generation: 2,
            best_fitness: Some(0.5),
            decision: Some(DecisionStats {
                window: 2,
                means: vec![0.25, 0.75],
                stds: vec![0.0, 0.0],
                skew: None,
                kurtosis: None,
                entropy: EntropyStats::default(),
                stability: 1.0,
            }),
            ..Default::default()
        };
        let csv = to_csv(&[plain, rich]).unwrap();
        let mut lines = csv.lines();
        let header: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(header[0], "generation");
        assert!(header.contains(&"diversity.mean_nodes"));
        assert!(header.contains(&"decision.entropy.mean"));
        assert!(header.contains(&"best_fitness"));
        assert!(!header.iter().any(|h| h.starts_with("decision.skew")));

        let col = header.iter().position(|h| *h == "best_fitness").unwrap();
        let first = lines.next().unwrap();
        assert!(first.starts_with("1,"));
        // No decision group in the first row: its array cells are empty.
        assert!(!first.contains('['));
        let second = lines.next().unwrap();
        assert!(second.contains("\"[0.25,0.75]\""));

        let plain_cells: Vec<&str> = first.split(',').collect();
        assert_eq!(plain_cells[col], "");
    }
}
