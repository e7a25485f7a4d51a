//! Path volume model
//!
//! Tubing is described as segments between named nodes (valve outlets, tee
//! and wye junctions, flowcell ports). A route is an ordered list of nodes;
//! its volume is the sum of the segments it walks. Routes never branch.
//!
//! Route volumes are computed once when the configuration is loaded and are
//! immutable afterwards ([`VolumeTable`]).

use crate::config::{ConfigError, PathConfig};
use crate::error::{AppResult, FluidicsError};
use std::collections::BTreeMap;

/// Route from the reagent valve to the far end of a flowcell; the flowcell
/// wash volume is derived from it.
pub const FLOWCELL_ROUTE: &str = "valve_to_flowcell_end";

/// Route from a reagent rotary valve (V1-V3) to the far end of a flowcell
pub const ROTARY_FLOWCELL_ROUTE: &str = "rotary_to_flowcell_end";

/// Tube between a reagent rotary valve and the flowcell valve
pub const ROTARY_LINE_ROUTE: &str = "rotary_to_valve4";

/// Wash bottle to the flowcell valve
pub const WASH_ROUTE: &str = "wash_to_valve4";

/// A tube between two nodes, oriented in the direction of travel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub from: String,
    pub to: String,
    pub volume: u32,
}

impl PathSegment {
    pub fn new(from: impl Into<String>, to: impl Into<String>, volume: u32) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            volume,
        }
    }

    fn joins(&self, a: &str, b: &str) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }

    fn oriented(&self, from: &str) -> PathSegment {
        if self.from == from {
            self.clone()
        } else {
            PathSegment::new(self.to.clone(), self.from.clone(), self.volume)
        }
    }
}

/// Total internal volume of a sequence of segments; `None` on overflow
pub fn path_volume(segments: &[PathSegment]) -> Option<u32> {
    segments
        .iter()
        .try_fold(0u32, |total, s| total.checked_add(s.volume))
}

/// Air-gap size for a reagent slug: `floor((reagent - flowcell) / 2)`.
///
/// Negative when the reagent is smaller than the flowcell.
pub fn gap_volume(reagent_volume: u32, flowcell_volume: u32) -> i64 {
    (i64::from(reagent_volume) - i64::from(flowcell_volume)).div_euclid(2)
}

/// Segments plus named routes over them
#[derive(Debug, Clone)]
pub struct FluidicPathGraph {
    segments: Vec<PathSegment>,
    routes: BTreeMap<String, Vec<String>>,
}

impl FluidicPathGraph {
    /// Build and check the graph.
    ///
    /// Every segment joins two distinct nodes, no two segments join the same
    /// pair, and every consecutive pair of nodes in a route is joined by a
    /// segment.
    pub fn from_config(config: &PathConfig) -> Result<Self, ConfigError> {
        let mut segments: Vec<PathSegment> = Vec::with_capacity(config.segments.len());
        for def in &config.segments {
            if def.from.is_empty() || def.to.is_empty() || def.from == def.to {
                return Err(ConfigError::ValidationError(format!(
                    "segment '{}' -> '{}' must join two distinct named nodes",
                    def.from, def.to
                )));
            }
            if segments.iter().any(|s| s.joins(&def.from, &def.to)) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate segment between '{}' and '{}'",
                    def.from, def.to
                )));
            }
            segments.push(PathSegment::new(def.from.clone(), def.to.clone(), def.volume));
        }

        let graph = Self {
            segments,
            routes: config.routes.clone(),
        };
        for (name, nodes) in &graph.routes {
            if nodes.len() < 2 {
                return Err(ConfigError::ValidationError(format!(
                    "route '{}' needs at least two nodes",
                    name
                )));
            }
            for pair in nodes.windows(2) {
                if graph.segment_between(&pair[0], &pair[1]).is_none() {
                    return Err(ConfigError::ValidationError(format!(
                        "route '{}' has no segment between '{}' and '{}'",
                        name, pair[0], pair[1]
                    )));
                }
            }
        }
        Ok(graph)
    }

    pub fn segment_between(&self, a: &str, b: &str) -> Option<&PathSegment> {
        self.segments.iter().find(|s| s.joins(a, b))
    }

    /// Segments of a named route, oriented along the route
    pub fn route_segments(&self, name: &str) -> Option<Vec<PathSegment>> {
        let nodes = self.routes.get(name)?;
        nodes
            .windows(2)
            .map(|pair| {
                self.segment_between(&pair[0], &pair[1])
                    .map(|s| s.oriented(&pair[0]))
            })
            .collect()
    }

    pub fn route_volume(&self, name: &str) -> Option<u32> {
        self.route_segments(name).and_then(|s| path_volume(&s))
    }

    pub fn route_names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

/// Derived volumes, fixed at configuration load
#[derive(Debug, Clone)]
pub struct VolumeTable {
    routes: BTreeMap<String, u32>,
    chambers: BTreeMap<String, u32>,
    flowcell_volume: u32,
    flowcell_wash: u32,
}

impl VolumeTable {
    pub fn from_config(config: &PathConfig) -> Result<Self, ConfigError> {
        let graph = FluidicPathGraph::from_config(config)?;
        let mut routes = BTreeMap::new();
        for name in graph.route_names() {
            let volume = graph.route_volume(name).ok_or_else(|| {
                ConfigError::ValidationError(format!("route '{}' volume overflows", name))
            })?;
            routes.insert(name.to_string(), volume);
        }

        let to_flowcell_end = *routes.get(FLOWCELL_ROUTE).ok_or_else(|| {
            ConfigError::ValidationError(format!("route '{}' is required", FLOWCELL_ROUTE))
        })?;
        // one flowcell volume already lies on the route; two more make three
        let flowcell_wash = config
            .flowcell_volume
            .checked_mul(2)
            .and_then(|extra| extra.checked_add(to_flowcell_end))
            .ok_or_else(|| {
                ConfigError::ValidationError("flowcell wash volume overflows".to_string())
            })?;

        Ok(Self {
            routes,
            chambers: config.chambers.clone(),
            flowcell_volume: config.flowcell_volume,
            flowcell_wash,
        })
    }

    /// Volume of a named route
    pub fn route(&self, name: &str) -> AppResult<u32> {
        self.routes
            .get(name)
            .copied()
            .ok_or_else(|| FluidicsError::InvalidArgument(format!("unknown route '{}'", name)))
    }

    pub fn routes(&self) -> &BTreeMap<String, u32> {
        &self.routes
    }

    pub fn flowcell_volume(&self) -> u32 {
        self.flowcell_volume
    }

    /// Volume that flushes a flowcell three times over
    pub fn flowcell_wash(&self) -> u32 {
        self.flowcell_wash
    }

    /// Air gap for a reagent slug in this flowcell
    pub fn gap(&self, reagent_volume: u32) -> i64 {
        gap_volume(reagent_volume, self.flowcell_volume)
    }

    pub fn chamber(&self, name: &str) -> Option<u32> {
        self.chambers.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentDefinition;

    fn config() -> PathConfig {
        let seg = |from: &str, to: &str, volume| SegmentDefinition {
            from: from.into(),
            to: to.into(),
            volume,
        };
        let mut routes = BTreeMap::new();
        routes.insert(
            FLOWCELL_ROUTE.to_string(),
            vec!["V3".into(), "V4".into(), "T".into(), "Y".into(), "FC_end".into()],
        );
        routes.insert("waste_back".to_string(), vec!["FC_end".into(), "Y".into()]);
        PathConfig {
            flowcell_volume: 100,
            slow_push_volume: 200,
            air_gap: 10,
            air_port: 10,
            wash_port: 9,
            flowcell_count: 2,
            segments: vec![
                seg("V3", "V4", 5),
                seg("V4", "T", 40),
                seg("T", "Y", 20),
                seg("Y", "FC_end", 135),
            ],
            routes,
            chambers: BTreeMap::from([("primer".to_string(), 650)]),
        }
    }

    #[test]
    fn test_gap_volume() {
        assert_eq!(gap_volume(900, 100), 400);
        assert_eq!(gap_volume(901, 100), 400);
        assert_eq!(gap_volume(100, 100), 0);
        assert_eq!(gap_volume(99, 100), -1);
    }

    #[test]
    fn test_path_volume_sums_segments() {
        let a = vec![PathSegment::new("A", "B", 12), PathSegment::new("B", "C", 30)];
        assert_eq!(path_volume(&a), Some(42));
        assert_eq!(path_volume(&[]), Some(0));
    }

    #[test]
    fn test_path_volume_overflow() {
        let long = vec![
            PathSegment::new("A", "B", u32::MAX),
            PathSegment::new("B", "C", 1),
        ];
        assert_eq!(path_volume(&long), None);
    }

    #[test]
    fn test_overflowing_route_rejected_at_load() {
        let mut cfg = config();
        cfg.segments[0].volume = u32::MAX;
        let err = VolumeTable::from_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_overflowing_wash_rejected_at_load() {
        let mut cfg = config();
        cfg.flowcell_volume = u32::MAX / 2;
        let err = VolumeTable::from_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_route_volumes_and_orientation() {
        let graph = FluidicPathGraph::from_config(&config()).unwrap();
        assert_eq!(graph.route_volume(FLOWCELL_ROUTE), Some(200));

        let back = graph.route_segments("waste_back").unwrap();
        assert_eq!(back, vec![PathSegment::new("FC_end", "Y", 135)]);
    }

    #[test]
    fn test_volume_table_derivations() {
        let table = VolumeTable::from_config(&config()).unwrap();
        assert_eq!(table.route(FLOWCELL_ROUTE).unwrap(), 200);
        assert_eq!(table.flowcell_wash(), 400);
        assert_eq!(table.gap(900), 400);
        assert_eq!(table.chamber("primer"), Some(650));
        assert!(table.route("nowhere").is_err());
    }

    #[test]
    fn test_flowcell_route_required() {
        let mut cfg = config();
        cfg.routes.remove(FLOWCELL_ROUTE);
        assert!(VolumeTable::from_config(&cfg).is_err());
    }

    #[test]
    fn test_duplicate_segment_rejected() {
        let mut cfg = config();
        cfg.segments.push(SegmentDefinition {
            from: "T".into(),
            to: "V4".into(),
            volume: 1,
        });
        assert!(FluidicPathGraph::from_config(&cfg).is_err());
    }
}
