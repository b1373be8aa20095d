//! Operation chains
//!
//! A chain is a JSON array of steps, each an object naming its operation in
//! `op` next to that operation's parameters:
//!
//! ```json
//! [
//!   {"op": "aspirate", "location": {"kind": "named", "rack": "samples", "well": "A1"}, "volume_ul": 50},
//!   {"op": "dispense", "location": {"kind": "named", "rack": "samples", "well": "B1"}, "volume_ul": 50},
//!   {"op": "wait", "minutes": 0.5}
//! ]
//! ```
//!
//! Every step is decoded and planned (bounds, volumes, rates) before the
//! first command goes out. Execution stops at the first failing step; steps
//! already run are not undone.

use core::fmt;
use core::ops::Range;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deck::Placeable;
use crate::error::{Error, Result};
use crate::ops::specs::{
    AirGap, AspirateSpec, CleanSpec, DispenseAllSpec, DispenseSpec, InternalWashSpec, MixSpec,
    TipExit, VialSpec, WashSpec,
};
use crate::ops::{LiquidHandler, Planner};
use crate::traits::CommandLink;

/// Operation names a chain may use
pub const OPERATIONS: &[&str] = &[
    "aspirate",
    "dispense",
    "dispense_all",
    "aspirate_system",
    "aspirate_air",
    "dispense_air",
    "mix",
    "wash",
    "internal_wash",
    "clean",
    "prepare_vial",
    "prime",
    "move_to",
    "tip_touch",
    "home",
    "comment",
    "wait",
];

/// System fluid drawn through the reservoir valve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSpec {
    pub volume_ul: f64,
    #[serde(default)]
    pub flow_rate_ml_min: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimeSpec {
    pub volume_ul: f64,
    /// Stroke size, the syringe capacity when absent
    #[serde(default)]
    pub chunk_ul: Option<f64>,
    /// Priming rate when absent
    #[serde(default)]
    pub flow_rate_ml_min: Option<f64>,
}

/// One chain step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChainOp {
    Aspirate(AspirateSpec),
    Dispense(DispenseSpec),
    DispenseAll(DispenseAllSpec),
    AspirateSystem(SystemSpec),
    AspirateAir(AirGap),
    DispenseAir(AirGap),
    Mix(MixSpec),
    Wash(WashSpec),
    InternalWash(InternalWashSpec),
    Clean(CleanSpec),
    PrepareVial(VialSpec),
    Prime(PrimeSpec),
    MoveTo {
        location: Placeable,
        #[serde(default)]
        on_edge: bool,
    },
    TipTouch {
        location: Placeable,
    },
    Home,
    Comment {
        message: String,
    },
    Wait {
        minutes: f64,
    },
}

impl ChainOp {
    pub fn name(&self) -> &'static str {
        match self {
            ChainOp::Aspirate(_) => "aspirate",
            ChainOp::Dispense(_) => "dispense",
            ChainOp::DispenseAll(_) => "dispense_all",
            ChainOp::AspirateSystem(_) => "aspirate_system",
            ChainOp::AspirateAir(_) => "aspirate_air",
            ChainOp::DispenseAir(_) => "dispense_air",
            ChainOp::Mix(_) => "mix",
            ChainOp::Wash(_) => "wash",
            ChainOp::InternalWash(_) => "internal_wash",
            ChainOp::Clean(_) => "clean",
            ChainOp::PrepareVial(_) => "prepare_vial",
            ChainOp::Prime(_) => "prime",
            ChainOp::MoveTo { .. } => "move_to",
            ChainOp::TipTouch { .. } => "tip_touch",
            ChainOp::Home => "home",
            ChainOp::Comment { .. } => "comment",
            ChainOp::Wait { .. } => "wait",
        }
    }

    /// Append this step's actions to a plan
    pub fn plan(&self, p: &mut Planner<'_>) -> Result<()> {
        match self {
            ChainOp::Aspirate(spec) => p.aspirate(spec).map(drop),
            ChainOp::Dispense(spec) => p.dispense(spec).map(drop),
            ChainOp::DispenseAll(spec) => p.dispense_all(spec).map(drop),
            ChainOp::AspirateSystem(spec) => p.aspirate_system(spec.volume_ul, spec.flow_rate_ml_min),
            ChainOp::AspirateAir(gap) => p.aspirate_air(gap),
            ChainOp::DispenseAir(gap) => p.dispense_air(gap),
            ChainOp::Mix(spec) => p.mix(spec),
            ChainOp::Wash(spec) => p.wash(spec),
            ChainOp::InternalWash(spec) => p.mix(&spec.to_mix()),
            ChainOp::Clean(spec) => p.clean(spec),
            ChainOp::PrepareVial(spec) => p.prepare_vial(spec).map(drop),
            ChainOp::Prime(spec) => p.prime(spec.volume_ul, spec.chunk_ul, spec.flow_rate_ml_min),
            ChainOp::MoveTo { location, on_edge } => p.move_to(location, *on_edge).map(drop),
            ChainOp::TipTouch { location } => {
                let location = p.locate(location)?;
                p.tip_exit(TipExit::TipTouch, &location)
            }
            ChainOp::Home => {
                p.home_arm();
                Ok(())
            }
            ChainOp::Comment { message } => {
                p.comment(message.clone());
                Ok(())
            }
            ChainOp::Wait { minutes } => {
                let duration = Duration::try_from_secs_f64(minutes * 60.0).map_err(|_| {
                    Error::descriptor(
                        "wait",
                        format!("minutes must be a non-negative number, got {minutes}"),
                    )
                })?;
                p.wait(duration);
                Ok(())
            }
        }
    }
}

/// Decode a chain document, checking every step name
pub fn parse_chain(json: &str) -> Result<Vec<ChainOp>> {
    let document: Value =
        serde_json::from_str(json).map_err(|e| Error::descriptor("chain", e))?;
    let Value::Array(steps) = document else {
        return Err(Error::descriptor("chain", "expected an array of steps"));
    };
    steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            let Some(name) = step.get("op").and_then(Value::as_str).map(str::to_owned) else {
                return Err(Error::ChainValidation {
                    index,
                    name: String::new(),
                    reason: "step has no \"op\" name".into(),
                });
            };
            if !OPERATIONS.contains(&name.as_str()) {
                return Err(Error::ChainValidation {
                    index,
                    name,
                    reason: "unknown operation".into(),
                });
            }
            serde_json::from_value(step).map_err(|e| Error::ChainValidation {
                index,
                name,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// One executed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    pub name: &'static str,
    /// Device-level actions the step expanded into
    pub actions: usize,
}

/// Outcome of a completed chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    pub steps: Vec<StepReport>,
}

impl ChainReport {
    pub fn total_actions(&self) -> usize {
        self.steps.iter().map(|s| s.actions).sum()
    }
}

impl fmt::Display for ChainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} steps, {} actions", self.steps.len(), self.total_actions())?;
        for step in &self.steps {
            write!(f, "\n  {:>3} {:<16} {}", step.index, step.name, step.actions)?;
        }
        Ok(())
    }
}

impl<L: CommandLink> LiquidHandler<L> {
    /// Validate the whole chain, then run it step by step
    pub fn run_chain(&mut self, ops: &[ChainOp]) -> Result<ChainReport> {
        self.run("chain", |h| {
            let (ranges, actions) = h.plan(|p| plan_chain(p, ops))?;
            let mut report = ChainReport::default();
            for (index, (op, range)) in ops.iter().zip(ranges).enumerate() {
                info!("Chain step {index}: {}", op.name());
                let count = range.len();
                for action in &actions[range] {
                    h.apply(action).map_err(|source| Error::ChainStep {
                        index,
                        name: op.name().into(),
                        source: Box::new(source),
                    })?;
                }
                report.steps.push(StepReport {
                    index,
                    name: op.name(),
                    actions: count,
                });
            }
            Ok(report)
        })
    }

    /// Parse then run a chain document
    pub fn run_chain_json(&mut self, json: &str) -> Result<ChainReport> {
        let ops = parse_chain(json)?;
        self.run_chain(&ops)
    }
}

/// Plan every step, returning each step's slice of the action list
fn plan_chain(p: &mut Planner<'_>, ops: &[ChainOp]) -> Result<Vec<Range<usize>>> {
    let mut ranges = Vec::with_capacity(ops.len());
    for (index, op) in ops.iter().enumerate() {
        let start = p.len();
        op.plan(p).map_err(|e| Error::ChainValidation {
            index,
            name: op.name().into(),
            reason: e.to_string(),
        })?;
        ranges.push(start..p.len());
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::*;
    use crate::state::{FaultKind, SessionState};
    use ampoule_protocol::DeviceKind;

    const TRANSFER: &str = r#"[
        {"op": "comment", "message": "transfer"},
        {"op": "aspirate", "location": {"kind": "named", "rack": "samples", "well": "A1"}, "volume_ul": 50},
        {"op": "dispense", "location": {"kind": "named", "rack": "samples", "well": "B1"}, "volume_ul": 50, "tip_exit": "tip_touch"},
        {"op": "home"}
    ]"#;

    #[test]
    fn test_parse_chain() {
        let ops = parse_chain(TRANSFER).unwrap();
        let names: Vec<_> = ops.iter().map(ChainOp::name).collect();
        assert_eq!(names, ["comment", "aspirate", "dispense", "home"]);
        match &ops[2] {
            ChainOp::Dispense(spec) => assert_eq!(spec.tip_exit, TipExit::TipTouch),
            other => panic!("expected dispense, got {other:?}"),
        }
    }

    #[test]
    fn test_every_operation_name_decodes() {
        for name in OPERATIONS {
            let value = serde_json::json!({ "op": name });
            let err = serde_json::from_value::<ChainOp>(value).err();
            // Only an unknown variant would mention the tag itself
            if let Some(err) = err {
                assert!(!err.to_string().contains("unknown variant"), "{name}: {err}");
            }
        }
    }

    #[test]
    fn test_unknown_operation() {
        let err = parse_chain(r#"[{"op": "home"}, {"op": "teleport"}]"#).unwrap_err();
        match err {
            Error::ChainValidation { index, name, .. } => {
                assert_eq!(index, 1);
                assert_eq!(name, "teleport");
            }
            other => panic!("expected ChainValidation, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_steps() {
        assert!(matches!(
            parse_chain(r#"[{"volume_ul": 5}]"#),
            Err(Error::ChainValidation { index: 0, .. })
        ));
        assert!(matches!(
            parse_chain(r#"[{"op": "aspirate", "volume_ul": 5}]"#),
            Err(Error::ChainValidation { index: 0, .. })
        ));
        assert!(matches!(
            parse_chain(r#"{"op": "home"}"#),
            Err(Error::Descriptor { .. })
        ));
    }

    #[test]
    fn test_run_chain_reports_steps() {
        let (mut handler, sim) = ready();
        let report = handler.run_chain_json(TRANSFER).unwrap();
        assert_eq!(report.steps.len(), 4);
        assert_eq!(report.steps[0].actions, 1);
        assert_eq!(report.steps[3].actions, 1);
        assert_eq!(sim.log().buffered().last().map(String::as_str), Some("H"));
        assert_eq!(handler.tracker().content_ul, 0.0);
        assert_eq!(handler.state(), SessionState::Ready);
    }

    #[test]
    fn test_invalid_step_sends_nothing() {
        let (mut handler, sim) = ready();
        let ops = parse_chain(
            r#"[
                {"op": "aspirate", "location": {"kind": "named", "rack": "samples", "well": "A1"}, "volume_ul": 50},
                {"op": "dispense", "location": {"kind": "named", "rack": "samples", "well": "B1"}, "volume_ul": 80}
            ]"#,
        )
        .unwrap();
        match handler.run_chain(&ops).unwrap_err() {
            Error::ChainValidation { index, name, .. } => {
                assert_eq!(index, 1);
                assert_eq!(name, "dispense");
            }
            other => panic!("expected ChainValidation, got {other:?}"),
        }
        assert!(sim.log().is_empty());
        assert_eq!(handler.state(), SessionState::Ready);
    }

    #[test]
    fn test_failing_step_stops_chain() {
        let (mut handler, sim) = ready();
        sim.inject_fault(DeviceKind::Pump, 26);
        let err = handler.run_chain_json(TRANSFER).unwrap_err();
        match &err {
            Error::ChainStep { index, source, .. } => {
                assert_eq!(*index, 1);
                assert!(matches!(**source, Error::Device { code: 26, .. }));
            }
            other => panic!("expected ChainStep, got {other:?}"),
        }
        assert_eq!(handler.state(), SessionState::Faulted(FaultKind::Device));
        // the arm moves of step 1 ran, step 2 never started
        assert!(!sim.log().buffered().contains(&"X8:50/32.8:50".to_owned()));
    }

    #[test]
    fn test_prepare_vial_step() {
        let (mut handler, sim) = ready();
        let report = handler
            .run_chain_json(
                r#"[{"op": "prepare_vial",
                     "components": [
                         {"location": {"kind": "named", "rack": "samples", "well": "A1"}, "volume_ul": 20},
                         {"location": {"kind": "named", "rack": "samples", "well": "A2"}, "volume_ul": 30}
                     ],
                     "destination": {"kind": "named", "rack": "samples", "well": "C1"},
                     "mix_displacement_ul": 40, "mix_cycles": 2}]"#,
            )
            .unwrap();
        assert_eq!(report.steps[0].name, "prepare_vial");
        let strokes = sim
            .log()
            .buffered()
            .into_iter()
            .filter(|c| c.starts_with("PN"))
            .count();
        // two transfers, then two mix cycles
        assert_eq!(strokes, 8);
        assert_eq!(handler.tracker().content_ul, 0.0);
    }

    #[test]
    fn test_wait_step() {
        let (mut handler, sim) = ready();
        handler
            .run_chain(&[ChainOp::Wait { minutes: 0.5 }])
            .unwrap();
        assert!(sim.paused() >= Duration::from_secs(30));
        for minutes in [-1.0, f64::NAN, f64::INFINITY, 1e300] {
            assert!(matches!(
                handler.run_chain(&[ChainOp::Wait { minutes }]),
                Err(Error::ChainValidation { .. })
            ));
        }
        assert_eq!(handler.state(), SessionState::Ready);
    }
}
