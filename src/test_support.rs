use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::api::overfast_api::{Endpoint, Upstream, UpstreamResponse};
use crate::database::heroes_db::Hero;
use crate::scheduler::clock::Clock;
use crate::util::sleeper::Sleeper;
use crate::Error;

type Handler = dyn Fn(&Endpoint, usize) -> Result<UpstreamResponse, Error> + Send + Sync;

/// Upstream double answering from a closure that receives the endpoint and how
/// many times that exact endpoint has been requested before.
pub struct ScriptedUpstream {
    handler: Box<Handler>,
    calls: Mutex<Vec<Endpoint>>,
}

impl ScriptedUpstream {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Endpoint, usize) -> Result<UpstreamResponse, Error> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(body: &str) -> Result<UpstreamResponse, Error> {
        Ok(UpstreamResponse {
            status: 200,
            retry_after: None,
            body: body.to_string(),
        })
    }

    pub fn status(status: u16) -> Result<UpstreamResponse, Error> {
        Ok(UpstreamResponse {
            status,
            retry_after: None,
            body: String::new(),
        })
    }

    pub fn throttled(retry_after: &str) -> Result<UpstreamResponse, Error> {
        Ok(UpstreamResponse {
            status: 429,
            retry_after: Some(retry_after.to_string()),
            body: String::new(),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Endpoint> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn get(&self, endpoint: &Endpoint) -> Result<UpstreamResponse, Error> {
        let previous = {
            let mut calls = self.calls.lock().unwrap();
            let previous = calls.iter().filter(|c| *c == endpoint).count();
            calls.push(endpoint.clone());
            previous
        };
        (self.handler)(endpoint, previous)
    }
}

/// Sleeper that returns immediately and remembers every requested wait.
#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.waits().iter().sum()
    }

    pub fn count_of(&self, duration: Duration) -> usize {
        self.waits().iter().filter(|w| **w == duration).count()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

/// Clock and sleeper in one: sleeping moves the clock forward.
#[derive(Clone)]
pub struct FakeTime {
    now: Arc<Mutex<DateTime<Utc>>>,
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl FakeTime {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            waits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

impl Clock for FakeTime {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[async_trait]
impl Sleeper for FakeTime {
    async fn sleep(&self, duration: Duration) {
        {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::from_std(duration)
                .unwrap_or_else(|_| chrono::Duration::zero());
            self.waits.lock().unwrap().push(duration);
        }
        tokio::task::yield_now().await;
    }
}

pub fn sample_hero(key: &str, role: &str) -> Hero {
    Hero {
        key: key.to_string(),
        name: key.to_uppercase(),
        portrait: format!("https://cdn.example/{key}.png"),
        role: Some(role.to_string()),
        description: String::new(),
        location: None,
        age: None,
        hitpoints_health: 250,
        hitpoints_armor: 0,
        hitpoints_shields: 0,
        synced_at: Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap(),
    }
}

pub fn calls_by_path(upstream: &ScriptedUpstream) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for call in upstream.calls() {
        *counts.entry(call.path()).or_insert(0) += 1;
    }
    counts
}
