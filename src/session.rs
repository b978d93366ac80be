//! Console-side state coordinator.
//!
//! One Session is the single source of truth for what the task table
//! shows: active filters, pagination cursor, the loaded page, the
//! loading flag, and the row-selection set. Every filter or pagination
//! change triggers exactly one reload, and a reload that comes back
//! stale (a newer one was started meanwhile) is discarded instead of
//! clobbering fresher results.
//!
//! The Session talks to the collection through a TaskGateway, so the
//! same coordinator runs against the HTTP façade or an in-process
//! store.

use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use crate::query::{DateRange, FilterCriteria, PageRequest, QueryPage, SortSpec};
use crate::store::{Priority, StoreError, Task, TaskDraft, TaskPatch, TaskStatus};

// ── Gateway boundary ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    NotFound,
    /// Rejected input. Field-level validation runs before the gateway is
    /// called, so this surfaces only for requests built outside a form.
    Invalid(String),
    /// Network or backend failure, no further classification.
    Transient(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::NotFound => write!(f, "task not found"),
            GatewayError::Invalid(msg) => write!(f, "{msg}"),
            GatewayError::Transient(msg) => write!(f, "request failed: {msg}"),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TaskNotFound => GatewayError::NotFound,
            StoreError::Invalid(msg) => GatewayError::Invalid(msg.to_string()),
        }
    }
}

/// What the Session needs from the backend. Batch calls return how many
/// rows were really affected — unknown ids are skipped server-side.
#[allow(async_fn_in_trait)]
pub trait TaskGateway {
    async fn list(
        &self,
        criteria: &FilterCriteria,
        sort: &SortSpec,
        page: &PageRequest,
    ) -> Result<QueryPage, GatewayError>;
    async fn create(&mut self, draft: TaskDraft) -> Result<Task, GatewayError>;
    async fn update(&mut self, id: Uuid, patch: TaskPatch) -> Result<Task, GatewayError>;
    async fn delete(&mut self, id: Uuid) -> Result<(), GatewayError>;
    async fn batch_delete(&mut self, ids: Vec<Uuid>) -> Result<usize, GatewayError>;
    async fn batch_set_status(
        &mut self,
        ids: Vec<Uuid>,
        status: TaskStatus,
    ) -> Result<usize, GatewayError>;
}

// ── Load tickets ───────────────────────────────────────────────

/// Sequence tag for one in-flight reload. Only the newest ticket may
/// install its result.
#[derive(Debug)]
pub struct LoadTicket {
    seq: u64,
}

// ── Debounce ───────────────────────────────────────────────────

/// Delay-coalescing guard for keyword input: every keystroke arms a new
/// token, which invalidates all older ones. A token that survives its
/// wait is the one keystroke burst that actually queries.
pub struct Debounce {
    seq: u64,
    delay: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct DebounceToken {
    seq: u64,
    delay: Duration,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Debounce { seq: 0, delay }
    }

    pub fn arm(&mut self) -> DebounceToken {
        self.seq += 1;
        DebounceToken { seq: self.seq, delay: self.delay }
    }

    pub fn is_current(&self, token: &DebounceToken) -> bool {
        token.seq == self.seq
    }
}

impl DebounceToken {
    pub async fn wait(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

// ── The Session ────────────────────────────────────────────────

pub struct Session<G> {
    gateway: G,
    pub filters: FilterCriteria,
    pub sort: SortSpec,
    pub page: PageRequest,
    /// From the last applied load; authoritative for page-count math.
    pub total: usize,
    pub tasks: Vec<Task>,
    pub loading: bool,
    /// Selected row ids. Independent of the loaded page — rows selected
    /// on other pages stay selected.
    pub selection: HashSet<Uuid>,
    /// Last failure, for the console's toast. Never fatal.
    pub last_error: Option<String>,
    load_seq: u64,
}

impl<G: TaskGateway> Session<G> {
    pub fn new(gateway: G) -> Self {
        Session {
            gateway,
            filters: FilterCriteria::default(),
            sort: SortSpec::default(),
            page: PageRequest::default(),
            total: 0,
            tasks: Vec::new(),
            loading: false,
            selection: HashSet::new(),
            last_error: None,
            load_seq: 0,
        }
    }

    // ── Loading ────────────────────────────────────────────────

    /// Start a reload: raises the loading flag and hands out a ticket
    /// tied to this request. Starting another load invalidates the
    /// ticket.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.load_seq += 1;
        self.loading = true;
        LoadTicket { seq: self.load_seq }
    }

    /// Install a reload result. Returns false (and changes nothing) if a
    /// newer load was started after this ticket — the loading flag then
    /// stays up for the newer request still in flight.
    ///
    /// A failed load keeps the previous page visible and only surfaces
    /// the error message.
    pub fn apply_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<QueryPage, GatewayError>,
    ) -> bool {
        if ticket.seq != self.load_seq {
            return false;
        }
        self.loading = false;
        match result {
            Ok(page) => {
                self.tasks = page.items;
                self.total = page.total;
                self.last_error = None;
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
            }
        }
        true
    }

    pub async fn reload(&mut self) {
        let ticket = self.begin_load();
        let result = self.gateway.list(&self.filters, &self.sort, &self.page).await;
        self.apply_load(ticket, result);
    }

    // ── Filter / pagination actions ────────────────────────────
    // Every filter change snaps back to page 1; moving the cursor alone
    // does not.

    pub async fn set_keyword(&mut self, keyword: Option<String>) {
        self.filters.keyword = keyword;
        self.page.page = 1;
        self.reload().await;
    }

    pub async fn set_status_filter(&mut self, status: Vec<TaskStatus>) {
        self.filters.status = status;
        self.page.page = 1;
        self.reload().await;
    }

    pub async fn set_priority_filter(&mut self, priority: Vec<Priority>) {
        self.filters.priority = priority;
        self.page.page = 1;
        self.reload().await;
    }

    pub async fn set_assignee(&mut self, assignee: Option<String>) {
        self.filters.assignee = assignee;
        self.page.page = 1;
        self.reload().await;
    }

    pub async fn set_date_range(&mut self, range: Option<DateRange>) {
        self.filters.date_range = range;
        self.page.page = 1;
        self.reload().await;
    }

    pub async fn set_sort(&mut self, sort: SortSpec) {
        self.sort = sort;
        self.page.page = 1;
        self.reload().await;
    }

    pub async fn set_page(&mut self, page: u32) {
        self.page.page = page;
        self.reload().await;
    }

    pub async fn set_page_size(&mut self, page_size: u32) {
        self.page.page_size = page_size;
        self.reload().await;
    }

    // ── Selection ──────────────────────────────────────────────

    pub fn toggle_selection(&mut self, id: Uuid) {
        if !self.selection.remove(&id) {
            self.selection.insert(id);
        }
    }

    /// Select every row of the loaded page (on top of whatever is
    /// already selected elsewhere).
    pub fn select_page(&mut self) {
        for task in &self.tasks {
            self.selection.insert(task.id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // ── Mutation actions ───────────────────────────────────────
    // Gateway failures never escape these methods: they land in
    // last_error and the previous page stays visible.

    pub async fn create_task(&mut self, draft: TaskDraft) -> Option<Task> {
        // Field rules run here so bad input never reaches the gateway.
        if let Err(e) = draft.validate() {
            self.last_error = Some(e.to_string());
            return None;
        }
        match self.gateway.create(draft).await {
            Ok(task) => {
                self.reload().await;
                Some(task)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                None
            }
        }
    }

    pub async fn update_task(&mut self, id: Uuid, patch: TaskPatch) -> Option<Task> {
        if let Err(e) = patch.validate() {
            self.last_error = Some(e.to_string());
            return None;
        }
        match self.gateway.update(id, patch).await {
            Ok(task) => {
                self.reload().await;
                Some(task)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                None
            }
        }
    }

    pub async fn delete_task(&mut self, id: Uuid) -> bool {
        match self.gateway.delete(id).await {
            Ok(()) => {
                self.selection.remove(&id);
                self.reload().await;
                true
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                false
            }
        }
    }

    /// Batch-delete the selected rows. Returns how many rows the backend
    /// really removed — selection entries that no longer exist are
    /// skipped there and not counted. The submitted ids leave the
    /// selection either way.
    pub async fn delete_selected(&mut self) -> usize {
        let ids: Vec<Uuid> = self.selection.iter().copied().collect();
        if ids.is_empty() {
            return 0;
        }
        match self.gateway.batch_delete(ids.clone()).await {
            Ok(affected) => {
                for id in &ids {
                    self.selection.remove(id);
                }
                self.reload().await;
                affected
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                0
            }
        }
    }

    /// Batch status change for the selected rows. Selection is kept —
    /// the rows still exist. Returns the real affected count.
    pub async fn set_status_for_selected(&mut self, status: TaskStatus) -> usize {
        let ids: Vec<Uuid> = self.selection.iter().copied().collect();
        if ids.is_empty() {
            return 0;
        }
        match self.gateway.batch_set_status(ids, status).await {
            Ok(affected) => {
                self.reload().await;
                affected
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                0
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{self, SortField, SortOrder};
    use crate::store::{Command, Store, StoreEvent};
    use std::cell::Cell;

    /// In-process gateway over a Store, with failure injection and call
    /// counting.
    struct MemoryGateway {
        store: Store,
        fail_listing: bool,
        create_calls: Cell<usize>,
    }

    impl MemoryGateway {
        fn new() -> Self {
            MemoryGateway {
                store: Store::new(),
                fail_listing: false,
                create_calls: Cell::new(0),
            }
        }
    }

    impl TaskGateway for MemoryGateway {
        async fn list(
            &self,
            criteria: &FilterCriteria,
            sort: &SortSpec,
            page: &PageRequest,
        ) -> Result<QueryPage, GatewayError> {
            if self.fail_listing {
                return Err(GatewayError::Transient("connection reset".into()));
            }
            query::query(self.store.tasks(), criteria, sort, page)
                .map_err(|e| GatewayError::Invalid(e.to_string()))
        }

        async fn create(&mut self, draft: TaskDraft) -> Result<Task, GatewayError> {
            self.create_calls.set(self.create_calls.get() + 1);
            match self.store.apply(Command::Create { draft })? {
                StoreEvent::TaskCreated { task, .. } => Ok(task),
                _ => unreachable!(),
            }
        }

        async fn update(&mut self, id: Uuid, patch: TaskPatch) -> Result<Task, GatewayError> {
            match self.store.apply(Command::Update { task_id: id, patch })? {
                StoreEvent::TaskUpdated { task, .. } => Ok(task),
                _ => unreachable!(),
            }
        }

        async fn delete(&mut self, id: Uuid) -> Result<(), GatewayError> {
            self.store.apply(Command::Delete { task_id: id })?;
            Ok(())
        }

        async fn batch_delete(&mut self, ids: Vec<Uuid>) -> Result<usize, GatewayError> {
            match self.store.apply(Command::BatchDelete { task_ids: ids })? {
                StoreEvent::TasksDeleted { task_ids, .. } => Ok(task_ids.len()),
                _ => unreachable!(),
            }
        }

        async fn batch_set_status(
            &mut self,
            ids: Vec<Uuid>,
            status: TaskStatus,
        ) -> Result<usize, GatewayError> {
            match self.store.apply(Command::BatchSetStatus { task_ids: ids, status })? {
                StoreEvent::TasksStatusChanged { task_ids, .. } => Ok(task_ids.len()),
                _ => unreachable!(),
            }
        }
    }

    fn draft(title: &str) -> TaskDraft {
        TaskDraft {
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            assignees: vec!["alice".into()],
            tags: Vec::new(),
            due_date: None,
        }
    }

    fn seeded_session(count: usize) -> Session<MemoryGateway> {
        let mut gateway = MemoryGateway::new();
        for i in 0..count {
            gateway.store.apply(Command::Create { draft: draft(&format!("t{i}")) }).unwrap();
        }
        Session::new(gateway)
    }

    fn page_of(items: Vec<Task>, total: usize) -> QueryPage {
        QueryPage { items, total }
    }

    #[tokio::test]
    async fn reload_installs_page_and_total() {
        let mut session = seeded_session(7);
        session.reload().await;
        assert_eq!(session.total, 7);
        assert_eq!(session.tasks.len(), 7);
        assert!(!session.loading);
        assert!(session.last_error.is_none());
    }

    #[test]
    fn stale_load_result_is_discarded() {
        let mut session = seeded_session(0);
        let old = session.begin_load();
        let new = session.begin_load();

        // The older request resolves after the newer one was started.
        let applied = session.apply_load(old, Ok(page_of(Vec::new(), 99)));
        assert!(!applied);
        assert_eq!(session.total, 0);
        // The newer request is still in flight.
        assert!(session.loading);

        let applied = session.apply_load(new, Ok(page_of(Vec::new(), 3)));
        assert!(applied);
        assert_eq!(session.total, 3);
        assert!(!session.loading);
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_page() {
        let mut session = seeded_session(4);
        session.reload().await;
        assert_eq!(session.tasks.len(), 4);

        session.gateway.fail_listing = true;
        session.reload().await;

        assert_eq!(session.tasks.len(), 4);
        assert_eq!(session.total, 4);
        assert!(!session.loading);
        assert!(session.last_error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn filter_changes_reset_the_page_cursor() {
        let mut session = seeded_session(30);
        session.set_page(3).await;
        assert_eq!(session.page.page, 3);

        session.set_keyword(Some("t1".into())).await;
        assert_eq!(session.page.page, 1);
    }

    #[tokio::test]
    async fn page_moves_keep_filters() {
        let mut session = seeded_session(30);
        session.set_keyword(Some("t1".into())).await;
        let filtered_total = session.total;

        session.set_page(2).await;
        assert_eq!(session.filters.keyword.as_deref(), Some("t1"));
        assert_eq!(session.total, filtered_total);
    }

    #[tokio::test]
    async fn sort_change_reloads_in_new_order() {
        let mut session = seeded_session(3);
        session
            .set_sort(SortSpec { field: SortField::Title, order: SortOrder::Asc })
            .await;
        let titles: Vec<&str> = session.tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["t0", "t1", "t2"]);
    }

    #[tokio::test]
    async fn created_task_shows_up_on_reload() {
        let mut session = seeded_session(1);
        session.reload().await;

        let created = session.create_task(draft("brand new")).await.unwrap();
        assert_eq!(created.created_at, created.updated_at);
        assert!(session.tasks.iter().any(|t| t.id == created.id));
        assert_eq!(session.total, 2);
    }

    #[tokio::test]
    async fn invalid_draft_never_reaches_the_gateway() {
        let mut session = seeded_session(0);
        let mut bad = draft("");
        bad.assignees = Vec::new();

        let created = session.create_task(bad).await;
        assert!(created.is_none());
        assert!(session.last_error.is_some());
        assert_eq!(session.gateway.create_calls.get(), 0);
    }

    #[tokio::test]
    async fn delete_prunes_selection_and_reloads() {
        let mut session = seeded_session(3);
        session.reload().await;
        let id = session.tasks[0].id;
        session.toggle_selection(id);

        assert!(session.delete_task(id).await);
        assert!(!session.selection.contains(&id));
        assert_eq!(session.total, 2);
    }

    #[tokio::test]
    async fn batch_delete_reports_only_real_deletions() {
        let mut session = seeded_session(3);
        session.reload().await;
        session.toggle_selection(session.tasks[0].id);
        session.toggle_selection(session.tasks[1].id);
        // A row that disappeared server-side meanwhile.
        session.selection.insert(Uuid::new_v4());

        let affected = session.delete_selected().await;
        assert_eq!(affected, 2);
        assert!(session.selection.is_empty());
        assert_eq!(session.total, 1);
    }

    #[tokio::test]
    async fn batch_status_keeps_selection() {
        let mut session = seeded_session(2);
        session.reload().await;
        session.select_page();

        let affected = session.set_status_for_selected(TaskStatus::Completed).await;
        assert_eq!(affected, 2);
        assert_eq!(session.selection.len(), 2);
        assert!(session.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn delete_of_missing_id_surfaces_as_toast() {
        let mut session = seeded_session(1);
        session.reload().await;

        let ok = session.delete_task(Uuid::new_v4()).await;
        assert!(!ok);
        assert_eq!(session.last_error.as_deref(), Some("task not found"));
        // Previous page untouched.
        assert_eq!(session.tasks.len(), 1);
    }

    #[test]
    fn toggle_and_clear_selection() {
        let mut session = seeded_session(0);
        let id = Uuid::new_v4();

        session.toggle_selection(id);
        assert!(session.selection.contains(&id));
        session.toggle_selection(id);
        assert!(!session.selection.contains(&id));

        session.toggle_selection(id);
        session.clear_selection();
        assert!(session.selection.is_empty());
    }

    #[test]
    fn newer_debounce_token_invalidates_older() {
        let mut debounce = Debounce::new(Duration::from_millis(150));
        let first = debounce.arm();
        let second = debounce.arm();

        assert!(!debounce.is_current(&first));
        assert!(debounce.is_current(&second));
    }

    #[tokio::test]
    async fn only_the_surviving_token_commits_its_keyword() {
        let mut session = seeded_session(5);
        let mut debounce = Debounce::new(Duration::from_millis(5));

        // Two quick keystrokes; only the second burst should query.
        let first = debounce.arm();
        let second = debounce.arm();

        first.wait().await;
        if debounce.is_current(&first) {
            session.set_keyword(Some("t9".into())).await;
        }

        second.wait().await;
        if debounce.is_current(&second) {
            session.set_keyword(Some("t2".into())).await;
        }

        assert_eq!(session.filters.keyword.as_deref(), Some("t2"));
        assert_eq!(session.total, 1);
    }
}
