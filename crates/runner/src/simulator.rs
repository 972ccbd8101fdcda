//! Deterministic stage implementations used in test mode. Each stage sleeps
//! briefly at every yield point and emits a canned message sequence, so runs
//! are fast, cancellable, and reproducible.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::pipeline::{FileArtifact, PipelineFactory, Stage, StageContext, StageError, StageOutput};

/// Builds the simulated PM → Architect → Engineer sequence.
#[derive(Debug, Clone)]
pub struct SimulatorPipeline {
    step_delay: Duration,
}

impl SimulatorPipeline {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl PipelineFactory for SimulatorPipeline {
    fn build(&self) -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(SimulatedPm {
                step_delay: self.step_delay,
            }),
            Box::new(SimulatedArchitect {
                step_delay: self.step_delay,
            }),
            Box::new(SimulatedEngineer {
                step_delay: self.step_delay,
            }),
        ]
    }
}

fn headline(requirement: &str) -> &str {
    let trimmed = requirement.trim();
    match trimmed.char_indices().nth(80) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

struct SimulatedPm {
    step_delay: Duration,
}

#[async_trait]
impl Stage for SimulatedPm {
    fn name(&self) -> &'static str {
        "PM"
    }

    async fn run(&self, input: &str, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        ctx.emit_message("Analyzing the requirement and drafting user stories...")
            .await;
        sleep(self.step_delay).await;

        ctx.emit_message("Writing the product requirements document...")
            .await;
        sleep(self.step_delay).await;

        let artifact = format!(
            "# Product Requirements\n\n\
             ## Goal\n{goal}\n\n\
             ## User stories\n\
             - As a user, I can accomplish the goal described above.\n\
             - As a user, I get feedback when something goes wrong.\n\n\
             ## Acceptance criteria\n\
             - The delivered software addresses: {goal}\n",
            goal = headline(input)
        );

        Ok(StageOutput {
            artifact_label: "prd".to_string(),
            artifact,
            summary: "PM completed successfully".to_string(),
            execution_output: None,
            files: Vec::new(),
        })
    }
}

struct SimulatedArchitect {
    step_delay: Duration,
}

#[async_trait]
impl Stage for SimulatedArchitect {
    fn name(&self) -> &'static str {
        "Architect"
    }

    async fn run(&self, input: &str, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        ctx.emit_message("Reviewing the product requirements document...")
            .await;
        sleep(self.step_delay).await;

        ctx.emit_message("Designing the system architecture...").await;
        sleep(self.step_delay).await;

        let artifact = format!(
            "# System Design\n\n\
             Derived from:\n{source}\n\n\
             ## Components\n\
             - cli: argument parsing and user interaction\n\
             - core: domain logic\n\
             - store: persistence\n\n\
             ## Data flow\ncli -> core -> store\n",
            source = headline(input)
        );

        Ok(StageOutput {
            artifact_label: "design".to_string(),
            artifact,
            summary: "Architect completed successfully".to_string(),
            execution_output: None,
            files: Vec::new(),
        })
    }
}

struct SimulatedEngineer {
    step_delay: Duration,
}

#[async_trait]
impl Stage for SimulatedEngineer {
    fn name(&self) -> &'static str {
        "Engineer"
    }

    async fn run(&self, input: &str, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        ctx.emit_message("Implementing the design...").await;
        sleep(self.step_delay).await;

        let files = vec![
            FileArtifact {
                file_path: "src/main.py".to_string(),
                content: format!(
                    "\"\"\"Generated implementation.\n\nDesign summary:\n{design}\n\"\"\"\n\n\n\
                     def main():\n    print(\"ok\")\n\n\n\
                     if __name__ == \"__main__\":\n    main()\n",
                    design = headline(input)
                ),
                language: Some("python".to_string()),
            },
            FileArtifact {
                file_path: "README.md".to_string(),
                content: format!("# Generated project\n\n{design}\n", design = headline(input)),
                language: Some("markdown".to_string()),
            },
        ];

        for file in &files {
            ctx.emit_file(format!("Creating file: {}", file.file_path), file)
                .await;
            sleep(self.step_delay).await;
        }

        let execution_output = "$ python src/main.py\nok\n".to_string();
        ctx.emit_execution("Running the generated program", execution_output.clone())
            .await;
        sleep(self.step_delay).await;

        let artifact = files
            .iter()
            .map(|f| format!("--- {}\n{}", f.file_path, f.content))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(StageOutput {
            artifact_label: "code".to_string(),
            artifact,
            summary: "Engineer completed successfully".to_string(),
            execution_output: Some(execution_output),
            files,
        })
    }
}
