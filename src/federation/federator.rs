//! Fan-out of read requests across the cohort.

use super::result::{EntityLookup, Federated, MemberDiagnostic};
use crate::error::{CohortError, Result};
use crate::instance::{InstanceCodec, InstanceEnvelope};
use crate::repository::SharedClient;
use metrics::{counter, histogram};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default per-call deadline.
pub const DEFAULT_FEDERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on concurrent member calls.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Outcome of one fan-out, in cohort order.
struct Gathered<T> {
    answers: Vec<(String, T)>,
    diagnostics: Vec<MemberDiagnostic>,
}

/// Read-only view over every member of the cohort.
///
/// Calls go to the local repository and every connected remote member
/// concurrently. Members that fail or miss the deadline are left out of the
/// result and reported as diagnostics; only when nobody answers does the call
/// fail with `RepositoryUnavailable`.
pub struct EnterpriseFederator {
    local: SharedClient,
    /// Remote members in the order they joined
    remotes: RwLock<Vec<SharedClient>>,
    codec: InstanceCodec,
    max_concurrency: usize,
    default_timeout: Duration,
}

impl EnterpriseFederator {
    pub fn new(local: SharedClient, codec: InstanceCodec) -> Self {
        Self {
            local,
            remotes: RwLock::new(Vec::new()),
            codec,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_timeout: DEFAULT_FEDERATION_TIMEOUT,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Connect a member. A client for an already connected id replaces it in place.
    pub fn add_member(&self, client: SharedClient) {
        let mut remotes = self.remotes.write();
        let id = client.metadata_collection_id().to_string();
        match remotes.iter_mut().find(|c| c.metadata_collection_id() == id) {
            Some(existing) => *existing = client,
            None => remotes.push(client),
        }
        debug!(member = %id, "Federated member connected");
    }

    pub fn remove_member(&self, metadata_collection_id: &str) -> bool {
        let mut remotes = self.remotes.write();
        let before = remotes.len();
        remotes.retain(|c| c.metadata_collection_id() != metadata_collection_id);
        remotes.len() != before
    }

    /// Collection ids of the remote members, in cohort order.
    pub fn member_ids(&self) -> Vec<String> {
        self.remotes
            .read()
            .iter()
            .map(|c| c.metadata_collection_id().to_string())
            .collect()
    }

    fn remote_clients(&self) -> Vec<SharedClient> {
        self.remotes.read().clone()
    }

    fn all_clients(&self) -> Vec<SharedClient> {
        let mut clients = vec![self.local.clone()];
        clients.extend(self.remote_clients());
        clients
    }

    /// Look an entity up, locally first and then across the cohort.
    pub async fn get_entity(
        &self,
        guid: &str,
        type_hint: Option<&str>,
        timeout: Duration,
    ) -> Result<Federated<EntityLookup>> {
        let deadline = Instant::now() + timeout;
        let local_id = self.local.metadata_collection_id().to_string();

        let mut diagnostics = Vec::new();
        let mut responders = 0;
        let mut local_proxy = None;
        match tokio::time::timeout_at(deadline, self.local.get_entity(guid)).await {
            Ok(Ok(entity)) => {
                responders += 1;
                if !entity.is_proxy {
                    let lookup = EntityLookup::from_answers(vec![(local_id, entity)])
                        .ok_or_else(|| CohortError::Internal("empty local answer".into()))?;
                    return self
                        .check_type_hint(lookup, type_hint)
                        .map(|l| Federated::new(l, diagnostics));
                }
                local_proxy = Some(entity);
            }
            Ok(Err(CohortError::NotFound(_))) => responders += 1,
            Ok(Err(e)) => diagnostics.push(MemberDiagnostic::error(&local_id, e.to_string())),
            Err(_) => diagnostics.push(MemberDiagnostic::timeout(&local_id)),
        }

        let owned_guid = guid.to_string();
        let gathered = self
            .gather(
                self.remote_clients(),
                deadline,
                move |client| {
                    let guid = owned_guid.clone();
                    async move {
                        match client.get_entity(&guid).await {
                            Ok(entity) => Ok(Some(entity)),
                            Err(CohortError::NotFound(_)) => Ok(None),
                            Err(e) => Err(e),
                        }
                    }
                },
                |_| false,
            )
            .await;

        diagnostics.extend(gathered.diagnostics);
        responders += gathered.answers.len();
        if responders == 0 {
            return Err(unavailable("get_entity", guid, &diagnostics));
        }

        let answers: Vec<(String, InstanceEnvelope)> = local_proxy
            .map(|proxy| (local_id, proxy))
            .into_iter()
            .chain(
                gathered
                    .answers
                    .into_iter()
                    .filter_map(|(member, entity)| entity.map(|e| (member, e))),
            )
            .collect();

        let lookup = EntityLookup::from_answers(answers).ok_or_else(|| {
            CohortError::NotFound(format!("entity {} not found in any cohort member", guid))
        })?;
        if lookup.conflicting_homes {
            warn!(guid = %guid, "Cohort members disagree on the home collection");
            counter!("cohort_federation_conflicting_homes_total").increment(1);
        }
        self.check_type_hint(lookup, type_hint)
            .map(|l| Federated::new(l, diagnostics))
    }

    fn check_type_hint(&self, lookup: EntityLookup, type_hint: Option<&str>) -> Result<EntityLookup> {
        if self.codec.matches_type(&lookup.entity.type_name, type_hint) {
            Ok(lookup)
        } else {
            Err(CohortError::NotFound(format!(
                "entity {} is a {}, not a {}",
                lookup.entity.guid,
                lookup.entity.type_name,
                type_hint.unwrap_or_default()
            )))
        }
    }

    /// Relationships of an entity across the cohort, deduplicated and paged.
    ///
    /// A `page_size` of zero returns everything from `page_start` on.
    pub async fn get_relationships_for_entity(
        &self,
        guid: &str,
        relationship_type: Option<&str>,
        page_start: usize,
        page_size: usize,
        timeout: Duration,
    ) -> Result<Federated<Vec<InstanceEnvelope>>> {
        let deadline = Instant::now() + timeout;
        let owned_guid = guid.to_string();
        let owned_type = relationship_type.map(str::to_string);

        let gathered = self
            .gather(
                self.all_clients(),
                deadline,
                move |client| {
                    let guid = owned_guid.clone();
                    let type_filter = owned_type.clone();
                    async move {
                        match client
                            .get_relationships_for_entity(&guid, type_filter.as_deref())
                            .await
                        {
                            Err(CohortError::NotFound(_)) => Ok(Vec::new()),
                            other => other,
                        }
                    }
                },
                |_| false,
            )
            .await;

        if gathered.answers.is_empty() {
            return Err(unavailable("get_relationships_for_entity", guid, &gathered.diagnostics));
        }

        let merged = merge_unique(gathered.answers);
        let page: Vec<InstanceEnvelope> = if page_size == 0 {
            merged.into_iter().skip(page_start).collect()
        } else {
            merged.into_iter().skip(page_start).take(page_size).collect()
        };
        Ok(Federated::new(page, gathered.diagnostics))
    }

    /// Entities of a type across the cohort, at most `cap`.
    ///
    /// Outstanding member calls are aborted as soon as enough entities have
    /// arrived.
    pub async fn collect_universe(
        &self,
        type_name: Option<&str>,
        cap: usize,
        timeout: Duration,
    ) -> Result<Federated<Vec<InstanceEnvelope>>> {
        if cap == 0 {
            return Err(CohortError::InvalidParameter("universe cap must be positive".into()));
        }
        let deadline = Instant::now() + timeout;
        let owned_type = type_name.map(str::to_string);

        let gathered = self
            .gather(
                self.all_clients(),
                deadline,
                move |client| {
                    let type_filter = owned_type.clone();
                    async move { client.find_entities(type_filter.as_deref(), cap).await }
                },
                move |answers: &[Option<Result<Vec<InstanceEnvelope>>>]| {
                    // Members may hold copies of the same instance.
                    let unique: HashSet<&str> = answers
                        .iter()
                        .flatten()
                        .filter_map(|r| r.as_ref().ok())
                        .flatten()
                        .map(|instance| instance.guid.as_str())
                        .collect();
                    unique.len() >= cap
                },
            )
            .await;

        if gathered.answers.is_empty() {
            return Err(unavailable(
                "collect_universe",
                type_name.unwrap_or("*"),
                &gathered.diagnostics,
            ));
        }

        let mut merged = merge_unique(gathered.answers);
        merged.truncate(cap);
        Ok(Federated::new(merged, gathered.diagnostics))
    }

    /// Call every client concurrently until all answer, the deadline passes,
    /// or `enough` says the answers so far suffice.
    async fn gather<T, F, Fut>(
        &self,
        clients: Vec<SharedClient>,
        deadline: Instant,
        call: F,
        enough: impl Fn(&[Option<Result<T>>]) -> bool,
    ) -> Gathered<T>
    where
        T: Send + 'static,
        F: Fn(SharedClient) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let started = std::time::Instant::now();
        let ids: Vec<String> = clients
            .iter()
            .map(|c| c.metadata_collection_id().to_string())
            .collect();
        let workers = clients.len().min(self.max_concurrency).max(1);
        let permits = Arc::new(Semaphore::new(workers));

        let mut tasks = JoinSet::new();
        for (index, client) in clients.into_iter().enumerate() {
            let permits = permits.clone();
            let request = call(client);
            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Err(CohortError::Internal("worker pool closed".into()))),
                };
                (index, request.await)
            });
        }

        let mut slots: Vec<Option<Result<T>>> = (0..ids.len()).map(|_| None).collect();
        let mut timed_out = false;
        let mut satisfied = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, result)))) => {
                    slots[index] = Some(result);
                    if enough(&slots) {
                        satisfied = true;
                        tasks.abort_all();
                        break;
                    }
                }
                Ok(Some(Err(e))) => warn!(error = %e, "Federated member call failed to complete"),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        let mut answers = Vec::new();
        let mut diagnostics = Vec::new();
        for (id, slot) in ids.into_iter().zip(slots) {
            match slot {
                Some(Ok(value)) => answers.push((id, value)),
                Some(Err(e)) => {
                    debug!(member = %id, error = %e, "Member left out of federated result");
                    diagnostics.push(MemberDiagnostic::error(id, e.to_string()));
                }
                // The answers in hand already satisfied the caller.
                None if satisfied => {}
                None if timed_out => diagnostics.push(MemberDiagnostic::timeout(id)),
                None => diagnostics.push(MemberDiagnostic::error(id, "member call aborted")),
            }
        }

        for diagnostic in &diagnostics {
            counter!(
                "cohort_federation_member_failures_total",
                "kind" => format!("{:?}", diagnostic.kind).to_lowercase()
            )
            .increment(1);
        }
        histogram!("cohort_federation_fanout_duration_seconds").record(started.elapsed().as_secs_f64());

        Gathered {
            answers,
            diagnostics,
        }
    }
}

/// Concatenate answers in cohort order, keeping the first copy of each guid.
fn merge_unique(answers: Vec<(String, Vec<InstanceEnvelope>)>) -> Vec<InstanceEnvelope> {
    let mut seen = HashSet::new();
    answers
        .into_iter()
        .flat_map(|(_, instances)| instances)
        .filter(|instance| seen.insert(instance.guid.clone()))
        .collect()
}

fn unavailable(operation: &str, subject: &str, diagnostics: &[MemberDiagnostic]) -> CohortError {
    let members: Vec<&str> = diagnostics
        .iter()
        .map(|d| d.metadata_collection_id.as_str())
        .collect();
    CohortError::RepositoryUnavailable(format!(
        "{} for {}: no cohort member answered ({})",
        operation,
        subject,
        members.join(", ")
    ))
}
