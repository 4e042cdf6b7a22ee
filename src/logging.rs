use std::fs::OpenOptions;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LogConfig;
use crate::{fmt, Error};

const APPLICATION: &str = "oowsync";
const SEQ_QUEUE_CAPACITY: usize = 1024;

pub fn init(config: &LogConfig) -> Result<(), Error> {
    let timer = tracing_subscriber::fmt::time::OffsetTime::local_rfc_3339()?;

    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let directives = [
        "sqlx=warn",
        "reqwest=warn",
        "hyper=warn",
        "hyper_util=warn",
        "h2=warn",
        "oowsync=trace",
        "oowsync::database=debug",
    ];

    for directive in directives {
        if let Ok(parsed) = directive.parse::<Directive>() {
            env_filter = env_filter.add_directive(parsed);
        }
    }

    let stdout_layer = default_layer()
        .with_writer(std::io::stdout)
        .with_timer(timer.clone());

    let text_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.path)?;
    let text_file_layer = default_layer()
        .pretty()
        .with_writer(Arc::new(text_file))
        .with_timer(timer.clone())
        .with_ansi(false);

    let json_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.json_path)?;
    let json_file_layer = default_layer()
        .json()
        .with_writer(Arc::new(json_file))
        .with_timer(timer)
        .with_ansi(false);

    let seq_layer = config.seq_endpoint.clone().map(SeqLayer::spawn);

    Registry::default()
        .with(env_filter)
        .with(stdout_layer)
        .with(text_file_layer)
        .with(json_file_layer)
        .with(seq_layer)
        .try_init()?;

    Ok(())
}

fn default_layer<S>() -> tracing_subscriber::fmt::Layer<S>
where
    S: Subscriber,
{
    tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_line_number(true)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
}

/// Ships events to Seq as CLEF. Events are queued to one background thread;
/// when the queue is full the event is dropped rather than blocking a job.
struct SeqLayer {
    sender: SyncSender<String>,
}

impl SeqLayer {
    fn spawn(endpoint: String) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<String>(SEQ_QUEUE_CAPACITY);

        std::thread::Builder::new()
            .name("seq-forwarder".into())
            .spawn(move || {
                for body in receiver {
                    post_clef(&endpoint, &body);
                }
            })
            .map_err(|e| eprintln!("Failed to start Seq forwarder: {}", e))
            .ok();

        Self { sender }
    }
}

fn post_clef(endpoint: &str, body: &str) {
    match ureq::post(endpoint)
        .set("Content-Type", "application/vnd.serilog.clef")
        .send_string(body)
    {
        Ok(_) => {}
        Err(ureq::Error::Status(code, response)) => {
            eprintln!(
                "Seq rejected log event (HTTP {}): {}",
                code,
                response.into_string().unwrap_or_default()
            );
        }
        Err(e) => eprintln!("Failed to send log to Seq: {}", e),
    }
}

#[derive(Default)]
struct ClefVisitor {
    fields: Map<String, Value>,
}

impl Visit for ClefVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), json!(fmt!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}

fn clef_level(level: &tracing::Level) -> &'static str {
    match *level {
        tracing::Level::TRACE => "Verbose",
        tracing::Level::DEBUG => "Debug",
        tracing::Level::INFO => "Information",
        tracing::Level::WARN => "Warning",
        tracing::Level::ERROR => "Error",
    }
}

impl<S: Subscriber> Layer<S> for SeqLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = ClefVisitor::default();
        event.record(&mut visitor);

        let message_template = visitor
            .fields
            .remove("message")
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| metadata.name().to_string());

        let mut payload = Map::new();
        payload.insert(
            "@t".into(),
            json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
        );
        payload.insert("@mt".into(), json!(message_template));
        payload.insert("@l".into(), json!(clef_level(metadata.level())));
        payload.insert("Application".into(), json!(APPLICATION));
        payload.insert("SourceContext".into(), json!(metadata.target()));
        if let Some(line) = metadata.line() {
            payload.insert("SourceLine".into(), json!(line));
        }
        payload.extend(visitor.fields);

        match self.sender.try_send(Value::Object(payload).to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => eprintln!("Seq queue full, dropping log event"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
