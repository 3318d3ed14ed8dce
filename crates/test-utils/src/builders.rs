//! Fixture DAGs and run settings shared by the integration tests.

use chrono::{DateTime, TimeZone, Utc};

use loaddag::dag::{Dag, DagBuilder, QualityCheck, StageFormat, TaskSpec};
use loaddag::engine::{RetryPolicy, RunConfig};

/// Task names of [`pipeline_dag`], in the order the stages fan out and in.
pub const PIPELINE_TASKS: [&str; 8] = [
    "start", "stage_a", "stage_b", "fact", "dim_x", "dim_y", "quality", "end",
];

/// 2018-11-01T00:00:00Z, the logical date every fixture runs at.
pub fn logical_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 11, 1, 0, 0, 0).unwrap()
}

/// Run settings at [`logical_date`] with a single attempt per task.
pub fn run_config() -> RunConfig {
    RunConfig::new(logical_date())
}

/// `run_config()` with `max_attempts` attempts and no backoff delay.
pub fn run_config_with_attempts(max_attempts: u32) -> RunConfig {
    run_config().with_retry(RetryPolicy::fixed(max_attempts, std::time::Duration::ZERO))
}

/// Tasks of the warehouse pipeline fixture.
///
/// ```text
/// start -> {stage_a, stage_b} -> fact -> {dim_x, dim_y} -> quality -> end
/// ```
pub fn pipeline_tasks() -> Vec<TaskSpec> {
    vec![
        TaskSpec::barrier("start"),
        TaskSpec::stage(
            "stage_a",
            "staging_a",
            "s3://bucket/a/{year}/{month}/{ds}-events.json",
            StageFormat::json_auto(),
        ),
        TaskSpec::stage(
            "stage_b",
            "staging_b",
            "s3://bucket/b/",
            StageFormat::Csv {
                delimiter: ',',
                ignore_header: 1,
            },
        ),
        TaskSpec::fact(
            "fact",
            "fact_table",
            "SELECT a.id, b.value FROM staging_a a JOIN staging_b b ON a.id = b.id",
        ),
        TaskSpec::dimension("dim_x", "dim_x_table", "SELECT DISTINCT x FROM staging_a"),
        TaskSpec::dimension("dim_y", "dim_y_table", "SELECT DISTINCT y FROM staging_b"),
        TaskSpec::quality(
            "quality",
            vec![
                QualityCheck::equals("SELECT COUNT(*) FROM dim_x_table WHERE x IS NULL", 0),
                QualityCheck::equals("SELECT COUNT(*) FROM dim_y_table WHERE y IS NULL", 0),
                QualityCheck::equals("SELECT COUNT(*) FROM fact_table WHERE id IS NULL", 0),
            ],
        ),
        TaskSpec::barrier("end"),
    ]
}

/// The pipeline fixture with every task passed through `adjust` first.
pub fn pipeline_dag_with(adjust: impl FnMut(TaskSpec) -> TaskSpec) -> Dag {
    let mut builder = DagBuilder::new()
        .fan_out("start", ["stage_a", "stage_b"])
        .fan_in(["stage_a", "stage_b"], "fact")
        .fan_out("fact", ["dim_x", "dim_y"])
        .fan_in(["dim_x", "dim_y"], "quality")
        .edge("quality", "end");
    for task in pipeline_tasks().into_iter().map(adjust) {
        builder = builder.task(task);
    }
    builder.build().expect("pipeline fixture is a valid DAG")
}

pub fn pipeline_dag() -> Dag {
    pipeline_dag_with(|task| task)
}

/// `start -> n1 -> n2 -> ... -> nN`, all barriers.
pub fn chain_dag(len: usize) -> Dag {
    let mut builder = DagBuilder::new().task(TaskSpec::barrier("start"));
    let mut prev = "start".to_string();
    for i in 1..=len {
        let name = format!("n{i}");
        builder = builder.task(TaskSpec::barrier(&name)).edge(&prev, &name);
        prev = name;
    }
    builder.build().expect("chain fixture is a valid DAG")
}

/// `start` fanning out to `width` independent dimension loads.
pub fn wide_dag(width: usize) -> Dag {
    let mut builder = DagBuilder::new().task(TaskSpec::barrier("start"));
    for i in 0..width {
        let name = format!("dim_{i:02}");
        builder = builder
            .task(TaskSpec::dimension(
                &name,
                format!("table_{i:02}"),
                "SELECT 1",
            ))
            .edge("start", &name);
    }
    builder.build().expect("wide fixture is a valid DAG")
}

/// TOML definition of the pipeline fixture, with `warehouse_cmd` as the
/// warehouse client command.
pub fn pipeline_toml(warehouse_cmd: &str) -> String {
    format!(
        r#"
[config]
max_concurrency = 4
max_attempts = 2
retry_delay = "10ms"
logical_date = "2018-11-01"

[warehouse]
cmd = "{warehouse_cmd}"
pool_size = 2

[templates.fact]
fact_table = "SELECT a.id, b.value FROM staging_a a JOIN staging_b b ON a.id = b.id"

[templates.dimension]
dim_x_table = "SELECT DISTINCT x FROM staging_a"
dim_y_table = "SELECT DISTINCT y FROM staging_b"

[task.start]
kind = "barrier"

[task.stage_a]
kind = "stage"
after = ["start"]
table = "staging_a"
source = "s3://bucket/a/{{year}}/{{month}}/{{ds}}-events.json"

[task.stage_b]
kind = "stage"
after = ["start"]
table = "staging_b"
source = "s3://bucket/b/"
format = "csv"

[task.fact]
kind = "fact"
after = ["stage_a", "stage_b"]
table = "fact_table"

[task.dim_x]
kind = "dimension"
after = ["fact"]
table = "dim_x_table"

[task.dim_y]
kind = "dimension"
after = ["fact"]
table = "dim_y_table"

[task.quality]
kind = "quality"
after = ["dim_x", "dim_y"]
checks = [
    {{ sql = "SELECT COUNT(*) FROM dim_x_table WHERE x IS NULL", expected = 0 }},
    {{ sql = "SELECT COUNT(*) FROM dim_y_table WHERE y IS NULL", expected = 0 }},
]

[task.end]
kind = "barrier"
after = ["quality"]
"#
    )
}
