//! Sound propagation paths: probe visibility, shortest-path finding, baked
//! path data, and the runtime path simulator.

mod visibility_graph;
pub use visibility_graph::{ProbeVisibilityGraph, ProbeVisibilityTester, VisibilityEdge};

mod finder;
pub use finder::{PathFinder, ProbePath};

mod baked;
pub use baked::{BakedPathData, PathBakeParams, PathBaker, SoundPath};

mod simulator;
pub use simulator::{PathSimulationParams, PathSimulator, PathSimulatorOutputs};
