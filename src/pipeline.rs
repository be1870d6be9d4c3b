use anyhow::Result;
use tracing::debug;

/// What a stage wants the pipeline to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

struct Stage<'a, C> {
    name: &'static str,
    run: Box<dyn FnOnce(&mut C) -> Result<Flow> + 'a>,
}

/// Stages run in order over a shared context. The first stage that halts
/// (or errors) ends the pipeline.
pub struct Pipeline<'a, C> {
    stages: Vec<Stage<'a, C>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub ran: Vec<&'static str>,
    pub halted_at: Option<&'static str>,
}

impl Completion {
    pub fn finished(&self) -> bool {
        self.halted_at.is_none()
    }
}

impl<'a, C> Default for Pipeline<'a, C> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<'a, C> Pipeline<'a, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(
        mut self,
        name: &'static str,
        stage: impl FnOnce(&mut C) -> Result<Flow> + 'a,
    ) -> Self {
        self.stages.push(Stage {
            name,
            run: Box::new(stage),
        });
        self
    }

    pub fn execute(self, context: &mut C) -> Result<Completion> {
        let mut ran = Vec::with_capacity(self.stages.len());

        for stage in self.stages {
            debug!("stage {}", stage.name);
            ran.push(stage.name);
            if (stage.run)(context)? == Flow::Halt {
                return Ok(Completion {
                    ran,
                    halted_at: Some(stage.name),
                });
            }
        }

        Ok(Completion {
            ran,
            halted_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[test]
    fn runs_every_stage_in_order() {
        let mut log = Vec::new();
        let completion = Pipeline::new()
            .then("first", |log: &mut Vec<u8>| {
                log.push(1);
                Ok(Flow::Continue)
            })
            .then("second", |log: &mut Vec<u8>| {
                log.push(2);
                Ok(Flow::Continue)
            })
            .execute(&mut log)
            .unwrap();

        assert_eq!(log, vec![1, 2]);
        assert!(completion.finished());
        assert_eq!(completion.ran, vec!["first", "second"]);
    }

    #[test]
    fn halt_skips_remaining_stages() {
        let mut log = Vec::new();
        let completion = Pipeline::new()
            .then("header", |log: &mut Vec<u8>| {
                log.push(1);
                Ok(Flow::Halt)
            })
            .then("build", |log: &mut Vec<u8>| {
                log.push(2);
                Ok(Flow::Continue)
            })
            .execute(&mut log)
            .unwrap();

        assert_eq!(log, vec![1]);
        assert_eq!(completion.halted_at, Some("header"));
    }

    #[test]
    fn errors_propagate() {
        let result = Pipeline::new()
            .then("broken", |_: &mut ()| bail!("tool missing"))
            .then("never", |_: &mut ()| Ok(Flow::Continue))
            .execute(&mut ());
        assert!(result.is_err());
    }
}
