use std::collections::BTreeMap;
use std::sync::Arc;

use crate::conductor_config::Taxonomy;
use crate::errors::RegistryError;
use crate::stage::Stage;

use super::{
    AdjudicationWorker, BriefWorker, ClarificationWorker, CompletionWorker, ConfirmQueryWorker,
    DebugWorker, DecompositionWorker, DevelopmentWorker, FeedbackWorker, IdeationWorker,
    IntakeWorker, LanguageWorker, MarketAnalysisWorker, PostDeliveryWorker, PresentPlanWorker,
    ReengageWorker, ReviewWorker, TechnicalPlanWorker, Worker,
};

/// Maps every stage to the worker that executes it.
#[derive(Clone)]
pub struct WorkerRegistry {
    workers: BTreeMap<Stage, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    /// Build the full registry.
    ///
    /// The taxonomy must define every specialization a stage draws on;
    /// `Taxonomy::from_config` enforces that, and it is rechecked here
    /// so a hand-built taxonomy cannot slip through.
    pub fn build(taxonomy: &Taxonomy) -> Result<Self, RegistryError> {
        for stage in Stage::ALL {
            if let Some(spec) = stage.specialization()
                && taxonomy.group(spec).is_none()
            {
                return Err(RegistryError::MissingSpecialization {
                    stage: stage.id().to_string(),
                    specialization: spec.tag().to_string(),
                });
            }
        }

        let workers: Vec<Arc<dyn Worker>> = vec![
            Arc::new(IntakeWorker),
            Arc::new(LanguageWorker),
            Arc::new(ConfirmQueryWorker),
            Arc::new(ClarificationWorker),
            Arc::new(BriefWorker),
            Arc::new(MarketAnalysisWorker),
            Arc::new(IdeationWorker),
            Arc::new(ReviewWorker::new(Stage::ConceptReview)),
            Arc::new(TechnicalPlanWorker),
            Arc::new(ReviewWorker::new(Stage::TechnicalReview)),
            Arc::new(PresentPlanWorker),
            Arc::new(FeedbackWorker),
            Arc::new(DecompositionWorker),
            Arc::new(DevelopmentWorker),
            Arc::new(ReviewWorker::new(Stage::QaLoop)),
            Arc::new(DebugWorker),
            Arc::new(CompletionWorker),
            Arc::new(PostDeliveryWorker),
            Arc::new(ReengageWorker),
            Arc::new(AdjudicationWorker),
        ];
        Ok(Self {
            workers: workers.into_iter().map(|w| (w.stage(), w)).collect(),
        })
    }

    /// Replace the worker for its stage.
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(worker.stage(), worker);
        self
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn Worker>> {
        self.workers.get(&stage).cloned()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.workers.keys().copied().collect()
    }
}
