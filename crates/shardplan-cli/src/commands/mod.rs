//! Plan rendering for the CLI

use anyhow::Result;
use serde::Serialize;
use shardplan_core::{Config, Feature, System};
use shardplan_scheduler::{EnvMap, Stage, TestPlan};

/// Planned invocation of one shard
#[derive(Debug, Serialize)]
pub struct ShardReport {
    pub shard: String,
    pub args: Vec<String>,
    pub delay_ms: u64,
}

/// Outcome of planning one feature stage
#[derive(Debug, Serialize)]
pub struct StageReport {
    pub feature: Feature,
    pub name: String,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub env: EnvMap,
    pub shards: Vec<ShardReport>,
}

/// Whole-run report
#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub cpus: usize,
    pub gpus: usize,
    pub memory_mb: u64,
    pub stages: Vec<StageReport>,
}

impl StageReport {
    fn from_stage(stage: &Stage, config: &Config, system: &System) -> Self {
        let planner = stage.planner();
        let shards = stage
            .spec()
            .map(|spec| {
                spec.shards
                    .iter()
                    .map(|shard| ShardReport {
                        shard: shard.to_string(),
                        args: planner.shard_args(shard, config),
                        delay_ms: planner.delay(shard, config, system).as_millis() as u64,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            feature: stage.kind(),
            name: stage.name().to_string(),
            phase: stage.phase().to_string(),
            workers: stage.spec().map(|spec| spec.workers),
            warnings: stage
                .planned()
                .map(|p| p.warnings.clone())
                .unwrap_or_default(),
            error: stage.error().map(|e| e.to_string()),
            env: stage.process_env(config, system),
            shards,
        }
    }
}

/// Plan the run and collect a serializable report
pub fn build_report(config: &Config, system: &System) -> Result<(TestPlan, PlanReport)> {
    let plan = TestPlan::new(config, system)?;
    let stages = plan
        .stages()
        .iter()
        .map(|stage| StageReport::from_stage(stage, config, system))
        .collect();

    let report = PlanReport {
        cpus: system.cpus.len(),
        gpus: system.gpus.len(),
        memory_mb: system.memory,
        stages,
    };
    Ok((plan, report))
}

/// Human-readable plan
pub fn render_text(config: &Config, system: &System) -> Result<String> {
    let (plan, report) = build_report(config, system)?;
    let mut lines = vec![plan.intro(system)];

    for (stage, stage_report) in plan.stages().iter().zip(&report.stages) {
        lines.push(String::new());

        let Some(intro) = stage.intro() else {
            lines.push(format!(
                "Skipping stage: {} ({})",
                stage_report.name,
                stage_report.error.as_deref().unwrap_or("not planned")
            ));
            continue;
        };
        lines.push(intro);

        for warning in &stage_report.warnings {
            lines.push(format!("  WARNING: {}", warning));
        }

        lines.push("  Environment:".to_string());
        for (key, value) in &stage_report.env {
            lines.push(format!("    {}={}", key, value));
        }

        lines.push(format!("  {:<16} {}", "SHARD", "ARGS"));
        for shard in &stage_report.shards {
            let mut line = format!("  {:<16} {}", shard.shard, shard.args.join(" "));
            if shard.delay_ms > 0 {
                line.push_str(&format!("  (delay {}ms)", shard.delay_ms));
            }
            lines.push(line);
        }
    }

    Ok(lines.join("\n"))
}

/// Plan as pretty-printed JSON
pub fn render_json(config: &Config, system: &System) -> Result<String> {
    let (_, report) = build_report(config, system)?;
    Ok(serde_json::to_string_pretty(&report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardplan_core::{Cpu, Gpu};

    fn system(cpus: u32, gpus: u32) -> System {
        System::new(
            (0..cpus).map(Cpu::single).collect(),
            (0..gpus).map(|id| Gpu { id, total: 16 << 30 }).collect(),
            128000,
        )
    }

    #[test]
    fn test_render_text_cpu_stage() {
        let text = render_text(&Config::default(), &system(6, 0)).unwrap();
        assert!(text.contains("Test Suite Configuration"));
        assert!(text.contains("Entering stage: CPU (with 2 workers)"));
        assert!(text.contains("--cpu-bind 0,1,2"));
        assert!(text.contains("--cpu-bind 3,4,5"));
        assert!(text.contains("REALM_SYNTHETIC_CORE_MAP="));
    }

    #[test]
    fn test_render_text_skips_failed_stage() {
        let mut config = Config::default();
        config.features = vec![Feature::Cpus, Feature::Cuda];
        let text = render_text(&config, &system(6, 0)).unwrap();
        assert!(text.contains("Skipping stage: GPU"));
    }

    #[test]
    fn test_render_text_gpu_delay() {
        let mut config = Config::default();
        config.features = vec![Feature::Cuda];
        let text = render_text(&config, &system(12, 2)).unwrap();
        assert!(text.contains("Entering stage: GPU"));
        assert!(text.contains("(delay 2000ms)"));
        assert!(text.contains("LEGATE_AUTO_CONFIG=0"));
    }

    #[test]
    fn test_render_json() {
        let json = render_json(&Config::default(), &system(6, 0)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["cpus"], 6);
        assert_eq!(value["stages"][0]["feature"], "cpus");
        assert_eq!(value["stages"][0]["workers"], 2);
        assert_eq!(value["stages"][0]["shards"][1]["shard"], "3,4,5");
        assert!(value["stages"][0].get("error").is_none());
    }

    #[test]
    fn test_all_failed_is_error() {
        let mut config = Config::default();
        config.features = vec![Feature::Cuda];
        assert!(render_text(&config, &system(6, 0)).is_err());
    }
}
