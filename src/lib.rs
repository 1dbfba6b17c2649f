//! # danci-adaptive - 自适应选题与组卷引擎
//!
//! 本 crate 提供纯 Rust 实现的自适应练习/测评决策逻辑:
//!
//! - **Ability Estimation** - Rasch (1PL) 能力估计，θ 与标准误 SE
//! - **Candidate Scoring** - 信息量 × 蓝图乘子 × 曝光乘子 × 疲劳系数
//! - **Seeded Selection** - Top-K 加权抽样，种子可复现
//! - **Stop Rule** - 精度 / 平台期 / 掌握度+校准题 三种停止条件
//! - **Form Builder** - 按蓝图权重组卷，先做可行性检查
//! - **Explainer** - 决策依据的可读说明
//!
//! ## 设计理念
//!
//! - **无状态** - 每次调用接收学习者快照，返回新快照，不在调用之间保存任何状态
//! - **确定性** - 所有随机性来自调用方提供的种子，从不读取系统时间
//! - **不做 I/O** - 存储、题库、配置加载均由调用方负责
//!
//! ## 模块结构
//!
//! - [`ability`] - 能力估计 (θ、SE、掌握概率)
//! - [`scoring`] - 候选题效用评分
//! - [`selector`] - 种子化 Top-K 选择
//! - [`stop_rule`] - 停止规则
//! - [`form`] - 蓝图约束组卷
//! - [`explain`] - 决策说明
//! - [`engine`] - 组合以上组件的门面
//! - [`config`] - 参数配置
//! - [`error`] - 错误类型
//! - [`sanitize`] - 数值稳定性
//! - [`types`] - 公共类型和常量
//!
//! ## 使用示例
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use danci_adaptive::{
//!     AdaptiveEngine, Blueprint, CandidateItem, EngineConfig, SelectionSeed, SessionContext,
//! };
//!
//! let engine = AdaptiveEngine::new(EngineConfig::default()).unwrap();
//! let blueprint = Blueprint::new(
//!     "algebra-basics",
//!     1,
//!     BTreeMap::from([("linear".to_string(), 2.0), ("quadratic".to_string(), 1.0)]),
//! )
//! .unwrap();
//! let items = vec![
//!     CandidateItem::new("q1", &["linear"], -0.5),
//!     CandidateItem::new("q2", &["quadratic"], 0.8),
//! ];
//! let session = SessionContext {
//!     session_id: "s-1".into(),
//!     started_at_ms: 0,
//!     now_ms: 0,
//!     items_answered: 0,
//! };
//!
//! let state = engine.new_learner("learner-1");
//! let seed = SelectionSeed::derive("learner-1", "s-1");
//! let pick = engine.next_item(&state, &items, &blueprint, &session, seed).unwrap();
//! let item = items.iter().find(|i| i.id == pick.item_id).unwrap();
//! let update = engine.record_response(&state, item, true, 1_000);
//! assert!(update.theta > state.theta);
//! ```

// ============================================================================
// 模块声明
// ============================================================================

pub mod ability;
pub mod config;
pub mod engine;
pub mod error;
pub mod explain;
pub mod form;
pub mod sanitize;
pub mod scoring;
pub mod selector;
pub mod stop_rule;
pub mod types;

// ============================================================================
// 重新导出
// ============================================================================

/// 重新导出所有公共类型
pub use types::*;

/// 重新导出配置与错误
pub use config::{
    AbilityParams, EngineConfig, FormParams, ScoringParams, SelectorParams, StopParams,
};
pub use error::{DeficitReport, EngineError, Result, TopicDeficit};

/// 重新导出各组件
pub use ability::{AbilityEstimator, EngineUpdateResult};
pub use engine::{AdaptiveEngine, SelectionResult};
pub use explain::{AbilitySignals, Explainer};
pub use form::{AssessmentForm, FormBuilder, FormItem};
pub use scoring::CandidateScorer;
pub use selector::{Selection, SelectionSeed, Selector};
pub use stop_rule::{StopDecision, StopRule, StopStatus, StopTrigger};
