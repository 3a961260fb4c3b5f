//! Retrieval orchestrator: route, search, validate, reformulate.
//!
//! One [`Retriever::ask`] call is one exchange. The loop is sequential, makes
//! at most `max_attempts` validation passes and always ends in
//! [`TerminalState::Success`] or [`TerminalState::GiveUp`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;

use kai_core::{
    DocumentStore, EntityIndex, KaiConfig, ReasoningService, RetrievalAttempt, RetrievalConfig,
    RouteDecision, SearchHit, TurnMessage, VectorEncoder,
};

use crate::lexical::extract_keywords;
use crate::router::{QueryRouter, RouteOrigin};
use crate::search::HybridSearch;
use crate::structured::RetryPolicy;
use crate::validator::{ResultValidator, Verdict};

/// Why an exchange ended without evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GiveUpReason {
    /// The router judged the question to need no search.
    SearchNotNeeded,
    /// The validator found nothing relevant and offered no new query.
    ValidatorDeclined,
    /// The last attempt failed and no attempts remain.
    BudgetExhausted,
    /// Search returned nothing on every attempt, even for the simplified query.
    NoHits,
    /// The exchange deadline expired.
    Timeout,
    /// A reformulated query drifted away from the question.
    DriftRejected,
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TerminalState {
    Success,
    GiveUp(GiveUpReason),
}

/// Everything one question produced: evidence plus the decision trail.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub id: Ulid,
    pub question: String,
    pub route: RouteDecision,
    pub route_origin: RouteOrigin,
    pub attempts: Vec<RetrievalAttempt>,
    /// Non-empty exactly when `outcome` is `Success`.
    pub evidence: Vec<SearchHit>,
    pub outcome: TerminalState,
    pub elapsed_ms: u64,
}

impl Exchange {
    pub fn is_success(&self) -> bool {
        self.outcome == TerminalState::Success
    }

    /// Validation passes made.
    pub fn validation_passes(&self) -> usize {
        self.attempts.iter().filter(|a| a.validation.is_some()).count()
    }
}

/// Loop state kept outside the deadline so a timeout keeps the trail.
#[derive(Default)]
struct Trail {
    route: Option<(RouteDecision, RouteOrigin)>,
    attempts: Vec<RetrievalAttempt>,
}

/// Drives one exchange at a time; shareable across concurrent exchanges.
pub struct Retriever {
    router: QueryRouter,
    search: HybridSearch,
    validator: ResultValidator,
    max_attempts: u32,
    drift_guard: bool,
    deadline: Duration,
}

impl Retriever {
    pub fn new(
        router: QueryRouter,
        search: HybridSearch,
        validator: ResultValidator,
        config: &RetrievalConfig,
        deadline: Duration,
    ) -> Self {
        Self {
            router,
            search,
            validator,
            max_attempts: config.max_attempts.max(1),
            drift_guard: config.drift_guard,
            deadline,
        }
    }

    /// Wire the full pipeline from collaborators and configuration.
    pub fn build(
        reasoner: Arc<dyn ReasoningService>,
        encoder: Arc<dyn VectorEncoder>,
        store: Arc<dyn DocumentStore>,
        entities: Arc<EntityIndex>,
        config: &KaiConfig,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config.reasoning);
        let router = QueryRouter::new(reasoner.clone(), entities, policy);
        let search = HybridSearch::new(store, encoder, config.retrieval.clone());
        let validator = ResultValidator::new(reasoner, policy);
        Self::new(router, search, validator, &config.retrieval, config.exchange_timeout())
    }

    /// Override the exchange deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    /// Answer-independent retrieval for one question. Never fails.
    pub async fn ask(&self, question: &str, history: &[TurnMessage], group: Option<&str>) -> Exchange {
        let start = Instant::now();
        let id = Ulid::new();
        info!("Exchange {} started: {:?}", id, question);

        let mut trail = Trail::default();
        let result = tokio::time::timeout(
            self.deadline,
            self.run(question, history, group, &mut trail),
        )
        .await;

        let (evidence, outcome) = match result {
            Ok(done) => done,
            Err(_) => {
                warn!("Exchange {} hit its {:?} deadline", id, self.deadline);
                (Vec::new(), TerminalState::GiveUp(GiveUpReason::Timeout))
            }
        };

        let (route, route_origin) = trail.route.unwrap_or_else(|| {
            (
                self.router.heuristic_route(question, history, group),
                RouteOrigin::Heuristic,
            )
        });

        let exchange = Exchange {
            id,
            question: question.to_string(),
            route,
            route_origin,
            attempts: trail.attempts,
            evidence,
            outcome,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Exchange {} finished in {}ms: {:?}, {} evidence, {} validation pass(es)",
            exchange.id,
            exchange.elapsed_ms,
            exchange.outcome,
            exchange.evidence.len(),
            exchange.validation_passes()
        );
        exchange
    }

    async fn run(
        &self,
        question: &str,
        history: &[TurnMessage],
        group: Option<&str>,
        trail: &mut Trail,
    ) -> (Vec<SearchHit>, TerminalState) {
        let (route, origin) = self.router.route_with_origin(question, history, group).await;
        trail.route = Some((route.clone(), origin));

        if !route.needs_search {
            debug!("Route says no search is needed");
            return give_up(GiveUpReason::SearchNotNeeded);
        }

        let mut query = initial_query(&route, question);

        for attempt in 1..=self.max_attempts {
            debug!("Attempt {}/{}: {:?}", attempt, self.max_attempts, query);

            let mut outcome = self.search.search(&query, &route).await;
            let mut simplified = false;

            if outcome.raw_count == 0 {
                if let Some(token) = first_token(&query) {
                    debug!("No hits for {:?}, retrying with {:?}", query, token);
                    query = token;
                    simplified = true;
                    outcome = self.search.search(&query, &route).await;
                }
            }

            if outcome.raw_count == 0 {
                trail.attempts.push(RetrievalAttempt {
                    attempt_number: attempt,
                    query_text: query.clone(),
                    simplified,
                    raw_count: 0,
                    raw_hits: Vec::new(),
                    validation: None,
                });
                if attempt >= self.max_attempts {
                    info!("No hits on attempt {}, giving up", attempt);
                    return give_up(GiveUpReason::NoHits);
                }
                // Store errors degrade to empty hits; the next slot searches again.
                info!("No hits on attempt {}, moving on with {:?}", attempt, query);
                continue;
            }

            let validation = self
                .validator
                .validate(question, &outcome.hits, &route.reasoning, attempt, self.max_attempts)
                .await;

            trail.attempts.push(RetrievalAttempt {
                attempt_number: attempt,
                query_text: query.clone(),
                simplified,
                raw_count: outcome.raw_count,
                raw_hits: outcome.hits,
                validation: Some(validation.decision.clone()),
            });

            match validation.verdict {
                Verdict::Accept(evidence) => {
                    info!("Attempt {} accepted {} hit(s)", attempt, evidence.len());
                    return (evidence, TerminalState::Success);
                }
                Verdict::Reformulate { query: next, strategy } => {
                    if self.drift_guard && drifted(question, &query, &next) {
                        warn!("Rejected drifting reformulation {:?}", next);
                        return give_up(GiveUpReason::DriftRejected);
                    }
                    info!(
                        "Reformulating ({}): {:?} -> {:?}",
                        strategy.as_ref().map(|s| s.as_str()).unwrap_or("unspecified"),
                        query,
                        next
                    );
                    query = next;
                }
                Verdict::GiveUp(_) => {
                    let reason = if attempt >= self.max_attempts
                        && validation.decision.needs_reformulation
                    {
                        GiveUpReason::BudgetExhausted
                    } else {
                        GiveUpReason::ValidatorDeclined
                    };
                    info!("Attempt {} ended without evidence: {:?}", attempt, reason);
                    return give_up(reason);
                }
            }
        }

        give_up(GiveUpReason::BudgetExhausted)
    }
}

fn give_up(reason: GiveUpReason) -> (Vec<SearchHit>, TerminalState) {
    (Vec::new(), TerminalState::GiveUp(reason))
}

/// Route keywords joined by spaces, or the question itself.
pub fn initial_query(route: &RouteDecision, question: &str) -> String {
    if route.enhancement_keywords.is_empty() {
        question.trim().to_string()
    } else {
        route.enhancement_keywords.join(" ")
    }
}

/// First token of a multi-token query.
fn first_token(query: &str) -> Option<String> {
    let mut tokens = query.split_whitespace();
    let first = tokens.next()?;
    tokens.next().map(|_| first.to_string())
}

/// Whether `next` shares no keyword with the question or the current query.
fn drifted(question: &str, current: &str, next: &str) -> bool {
    let known: HashSet<String> = extract_keywords(question)
        .into_iter()
        .chain(extract_keywords(current))
        .collect();
    !extract_keywords(next).iter().any(|k| known.contains(k))
}
