//! Fixed-template project plans for the `/plan` command.
//!
//! Every task gets the same three phases with hour estimates. The shell keeps
//! the plans it has produced for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One phase of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPhase {
    pub name: String,
    pub tasks: Vec<String>,
    pub hours: u32,
}

impl PlanPhase {
    fn new(name: &str, tasks: &[&str], hours: u32) -> Self {
        Self {
            name: name.to_string(),
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
            hours,
        }
    }
}

/// A task broken into the standard phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPlan {
    pub task: String,
    pub phases: Vec<PlanPhase>,
}

impl ProjectPlan {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            phases: vec![
                PlanPhase::new("Planning", &["Requirements", "Design"], 2),
                PlanPhase::new("Implementation", &["Core code", "Features"], 6),
                PlanPhase::new("Testing", &["Unit tests", "Integration"], 2),
            ],
        }
    }

    pub fn total_hours(&self) -> u32 {
        self.phases.iter().map(|p| p.hours).sum()
    }
}

impl fmt::Display for ProjectPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plan: {}", self.task)?;
        writeln!(f, "  {:<16} {:<28} {}", "Phase", "Tasks", "Hours")?;
        for phase in &self.phases {
            writeln!(
                f,
                "  {:<16} {:<28} {}",
                phase.name,
                phase.tasks.join(", "),
                phase.hours
            )?;
        }
        write!(f, "Total: {} hours", self.total_hours())
    }
}
