use crate::domain_model::*;
use crate::domain_port::{ProfileError, ProfileRepo};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct FakeProfileRepo {
    users: DashMap<UserId, User>,
    get_failures: Mutex<VecDeque<ProfileError>>,
    create_failures: Mutex<VecDeque<ProfileError>>,
    fetches: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    next_get_delays: Mutex<VecDeque<Duration>>,
    create_delay: Mutex<Option<Duration>>,
}

impl FakeProfileRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.insert_at(user.id, user);
    }

    /// Store `user` under an arbitrary id, e.g. to simulate a row whose id
    /// does not match the key it was looked up by.
    pub fn insert_at(&self, id: UserId, user: User) {
        self.users.insert(id, user);
    }

    pub fn get(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|u| u.value().clone())
    }

    pub fn fail_next_get(&self, error: ProfileError) {
        if let Ok(mut queue) = self.get_failures.lock() {
            queue.push_back(error);
        }
    }

    pub fn fail_next_create(&self, error: ProfileError) {
        if let Ok(mut queue) = self.create_failures.lock() {
            queue.push_back(error);
        }
    }

    /// Number of `get_by_id` calls that reached the repo.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Makes every `get_by_id` wait, to widen race windows in tests.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = Some(delay);
        }
    }

    /// Delays only the next `get_by_id`, ahead of `set_delay`.
    pub fn delay_next_get(&self, delay: Duration) {
        if let Ok(mut queue) = self.next_get_delays.lock() {
            queue.push_back(delay);
        }
    }

    pub fn set_create_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.create_delay.lock() {
            *slot = Some(delay);
        }
    }

    fn take(queue: &Mutex<VecDeque<ProfileError>>) -> Option<ProfileError> {
        queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[async_trait::async_trait]
impl ProfileRepo for FakeProfileRepo {
    async fn get_by_id(&self, _session: Option<&Session>, id: UserId) -> Result<User, ProfileError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // The row is read when the request arrives; the delay models the
        // response travelling back.
        let result = match Self::take(&self.get_failures) {
            Some(error) => Err(error),
            None => self.get(id).ok_or(ProfileError::NotFound),
        };

        let next = self.next_get_delays.lock().ok().and_then(|mut q| q.pop_front());
        let delay = next.or_else(|| self.delay.lock().ok().and_then(|d| *d));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn create(&self, _session: Option<&Session>, user: &NewUser) -> Result<User, ProfileError> {
        let delay = self.create_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = Self::take(&self.create_failures) {
            return Err(error);
        }
        if self.users.contains_key(&user.id) {
            return Err(ProfileError::Store(
                "duplicate key value violates unique constraint \"users_pkey\"".to_string(),
            ));
        }

        let created = User {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            profile_pic: None,
            created_at: Utc::now(),
        };
        self.insert(created.clone());
        Ok(created)
    }
}
