//! Stage and specialization identifiers.
//!
//! Both are closed sets. `Stage` names one step of the workflow and is the
//! wire identifier exchanged with the decision service; `Specialization`
//! names a worker group from the taxonomy and doubles as the `group` tag on
//! tasks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One named step of the workflow, implemented by exactly one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "step_1_initial_request")]
    InitialRequest,
    #[serde(rename = "step_2_polish_query")]
    PolishQuery,
    #[serde(rename = "step_3_user_confirmation_1")]
    ConfirmQuery,
    #[serde(rename = "step_4_deep_clarification")]
    DeepClarification,
    #[serde(rename = "step_5_final_project_brief")]
    ProjectBrief,
    #[serde(rename = "step_6_market_analysis")]
    MarketAnalysis,
    #[serde(rename = "step_7_creative_ideation")]
    CreativeIdeation,
    #[serde(rename = "step_8_internal_review_1")]
    ConceptReview,
    #[serde(rename = "step_9_technical_planning")]
    TechnicalPlanning,
    #[serde(rename = "step_10_internal_review_2")]
    TechnicalReview,
    #[serde(rename = "step_11_present_plan_to_user")]
    PresentPlan,
    #[serde(rename = "step_12_user_feedback_loop")]
    UserFeedback,
    #[serde(rename = "step_12a_decompose_plan")]
    DecomposePlan,
    #[serde(rename = "step_13_task_execution")]
    TaskExecution,
    #[serde(rename = "step_14_qa_loop")]
    QaLoop,
    #[serde(rename = "step_14a_debug_fix")]
    DebugFix,
    #[serde(rename = "step_15_project_completion")]
    ProjectCompletion,
    #[serde(rename = "step_16_post_delivery_review")]
    PostDeliveryReview,
    #[serde(rename = "step_17_reengage_workflow")]
    Reengage,
    #[serde(rename = "step_dispute_resolution")]
    DisputeResolution,
}

impl Stage {
    /// Every stage, in workflow order.
    pub const ALL: [Stage; 20] = [
        Stage::InitialRequest,
        Stage::PolishQuery,
        Stage::ConfirmQuery,
        Stage::DeepClarification,
        Stage::ProjectBrief,
        Stage::MarketAnalysis,
        Stage::CreativeIdeation,
        Stage::ConceptReview,
        Stage::TechnicalPlanning,
        Stage::TechnicalReview,
        Stage::PresentPlan,
        Stage::UserFeedback,
        Stage::DecomposePlan,
        Stage::TaskExecution,
        Stage::QaLoop,
        Stage::DebugFix,
        Stage::ProjectCompletion,
        Stage::PostDeliveryReview,
        Stage::Reengage,
        Stage::DisputeResolution,
    ];

    /// Entry point of every project.
    pub const ENTRY: Stage = Stage::InitialRequest;

    /// Stages whose dossier may carry a dispute.
    pub const REVIEWS: [Stage; 3] = [Stage::ConceptReview, Stage::TechnicalReview, Stage::QaLoop];

    pub fn id(&self) -> &'static str {
        match self {
            Stage::InitialRequest => "step_1_initial_request",
            Stage::PolishQuery => "step_2_polish_query",
            Stage::ConfirmQuery => "step_3_user_confirmation_1",
            Stage::DeepClarification => "step_4_deep_clarification",
            Stage::ProjectBrief => "step_5_final_project_brief",
            Stage::MarketAnalysis => "step_6_market_analysis",
            Stage::CreativeIdeation => "step_7_creative_ideation",
            Stage::ConceptReview => "step_8_internal_review_1",
            Stage::TechnicalPlanning => "step_9_technical_planning",
            Stage::TechnicalReview => "step_10_internal_review_2",
            Stage::PresentPlan => "step_11_present_plan_to_user",
            Stage::UserFeedback => "step_12_user_feedback_loop",
            Stage::DecomposePlan => "step_12a_decompose_plan",
            Stage::TaskExecution => "step_13_task_execution",
            Stage::QaLoop => "step_14_qa_loop",
            Stage::DebugFix => "step_14a_debug_fix",
            Stage::ProjectCompletion => "step_15_project_completion",
            Stage::PostDeliveryReview => "step_16_post_delivery_review",
            Stage::Reengage => "step_17_reengage_workflow",
            Stage::DisputeResolution => "step_dispute_resolution",
        }
    }

    /// Short human-readable title for progress output.
    pub fn title(&self) -> &'static str {
        match self {
            Stage::InitialRequest => "Initial request",
            Stage::PolishQuery => "Polish query",
            Stage::ConfirmQuery => "Confirm refined query",
            Stage::DeepClarification => "Deep clarification",
            Stage::ProjectBrief => "Project brief",
            Stage::MarketAnalysis => "Market analysis",
            Stage::CreativeIdeation => "Creative ideation",
            Stage::ConceptReview => "Concept review",
            Stage::TechnicalPlanning => "Technical planning",
            Stage::TechnicalReview => "Technical review",
            Stage::PresentPlan => "Present plan",
            Stage::UserFeedback => "User feedback",
            Stage::DecomposePlan => "Decompose plan",
            Stage::TaskExecution => "Task execution",
            Stage::QaLoop => "QA loop",
            Stage::DebugFix => "Debug fix",
            Stage::ProjectCompletion => "Project completion",
            Stage::PostDeliveryReview => "Post-delivery review",
            Stage::Reengage => "Re-engage",
            Stage::DisputeResolution => "Dispute resolution",
        }
    }

    pub fn is_review(&self) -> bool {
        Self::REVIEWS.contains(self)
    }

    /// The taxonomy group a stage's worker draws its models from, if any.
    pub fn specialization(&self) -> Option<Specialization> {
        match self {
            Stage::InitialRequest
            | Stage::ConfirmQuery
            | Stage::DeepClarification
            | Stage::ProjectBrief
            | Stage::PresentPlan
            | Stage::UserFeedback
            | Stage::PostDeliveryReview => Some(Specialization::UserEngagement),
            Stage::PolishQuery => Some(Specialization::LanguageExpert),
            Stage::MarketAnalysis
            | Stage::TechnicalPlanning
            | Stage::DecomposePlan
            | Stage::ProjectCompletion => Some(Specialization::Analysts),
            Stage::CreativeIdeation => Some(Specialization::Innovators),
            Stage::ConceptReview | Stage::TechnicalReview | Stage::QaLoop => {
                Some(Specialization::QaCouncil)
            }
            Stage::TaskExecution => Some(Specialization::BackendDevelopment),
            Stage::DebugFix => Some(Specialization::DebuggingSupport),
            Stage::DisputeResolution => Some(Specialization::AdjudicationUnit),
            Stage::Reengage => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_matches(|c| c == '`' || c == '"' || c == '\'');
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.id() == trimmed)
            .ok_or_else(|| anyhow::anyhow!("Unknown stage '{}'", s))
    }
}

/// A worker group from the taxonomy. Also the `group` tag carried by tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    #[serde(rename = "user_engagement_group")]
    UserEngagement,
    #[serde(rename = "language_expert_group")]
    LanguageExpert,
    #[serde(rename = "analysts_group")]
    Analysts,
    #[serde(rename = "innovators_group")]
    Innovators,
    #[serde(rename = "frontend_development_group")]
    FrontendDevelopment,
    #[serde(rename = "backend_development_group")]
    BackendDevelopment,
    #[serde(rename = "debugging_support_group")]
    DebuggingSupport,
    QaCouncil,
    AdjudicationUnit,
}

impl Specialization {
    pub const ALL: [Specialization; 9] = [
        Specialization::UserEngagement,
        Specialization::LanguageExpert,
        Specialization::Analysts,
        Specialization::Innovators,
        Specialization::FrontendDevelopment,
        Specialization::BackendDevelopment,
        Specialization::DebuggingSupport,
        Specialization::QaCouncil,
        Specialization::AdjudicationUnit,
    ];

    /// Groups that claim tasks during task execution, in claim order.
    pub const DEVELOPMENT: [Specialization; 2] = [
        Specialization::BackendDevelopment,
        Specialization::FrontendDevelopment,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Specialization::UserEngagement => "user_engagement_group",
            Specialization::LanguageExpert => "language_expert_group",
            Specialization::Analysts => "analysts_group",
            Specialization::Innovators => "innovators_group",
            Specialization::FrontendDevelopment => "frontend_development_group",
            Specialization::BackendDevelopment => "backend_development_group",
            Specialization::DebuggingSupport => "debugging_support_group",
            Specialization::QaCouncil => "qa_council",
            Specialization::AdjudicationUnit => "adjudication_unit",
        }
    }

    pub fn is_development(&self) -> bool {
        Self::DEVELOPMENT.contains(self)
    }
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Specialization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Specialization::ALL
            .iter()
            .copied()
            .find(|spec| spec.tag() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("Unknown specialization '{}'", s))
    }
}
