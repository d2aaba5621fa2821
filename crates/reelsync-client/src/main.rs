//! reelsync-sim: several actors editing one timeline at once.
//!
//! Every actor runs its own session and poll loop against a shared in-process
//! operation log. Edits, undos and redos are drawn at random; conflicts are
//! resolved by reloading. At the end every session is polled once more and
//! compared with the canonical snapshot.
//!
//! ## Usage
//!
//! ```bash
//! # Three actors, 50 steps each, in memory
//! reelsync-sim --actors 3 --steps 50
//!
//! # Persist the log and reuse it across runs
//! reelsync-sim --db /tmp/reelsync.db --config sync.ron
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use reelsync_client::{
    EditOutcome, LocalTransport, OpLogClient, Resolution, SessionError, SessionHandle, SyncConfig,
    SyncSession, spawn_poll_loop, spawn_session,
};
use reelsync_server::{ErrorCode, OpLogDb, OpLogStore};
use reelsync_types::{
    ActorId, AudioTrack, Clip, ClipId, DocumentKey, Layer, Marker, MarkerId, TimelineSnapshot,
};

/// Concurrent editing simulation against a shared operation log.
#[derive(Parser, Debug)]
#[command(name = "reelsync-sim")]
#[command(about = "Simulate concurrent timeline editors")]
struct Args {
    /// Session config (RON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite file for the operation log; in memory when omitted
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long, default_value = "demo")]
    project: String,

    #[arg(long, default_value = "main")]
    sequence: String,

    /// Number of concurrent actors
    #[arg(short, long, default_value_t = 3)]
    actors: usize,

    /// Random actions per actor
    #[arg(short, long, default_value_t = 25)]
    steps: usize,

    #[arg(long, default_value_t = 1)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SyncConfig::default(),
    };

    let store = match &args.db {
        Some(path) => {
            let db = OpLogDb::open(path)
                .with_context(|| format!("opening database {}", path.display()))?;
            let known = db.list_documents()?;
            info!("{} holds {} documents", path.display(), known.len());
            Arc::new(OpLogStore::with_db(db))
        }
        None => Arc::new(OpLogStore::new()),
    };

    let key = DocumentKey::new(args.project.as_str(), args.sequence.as_str());
    match store.fetch(&key) {
        Ok(state) => info!("resuming {} at version {}", key, state.version),
        Err(err) if err.code == ErrorCode::DocumentNotFound => {
            store.create_document(key.clone(), starting_timeline(), &ActorId::from("sim"))?;
        }
        Err(err) => return Err(err.into()),
    }

    let mut handles = Vec::with_capacity(args.actors);
    let mut pollers = Vec::with_capacity(args.actors);
    for n in 0..args.actors {
        let transport = LocalTransport::new(store.clone(), format!("actor-{n}"));
        let client = OpLogClient::new(Arc::new(transport), key.clone());
        let session = SyncSession::open(client, config.clone()).await?;
        let (handle, _task) = spawn_session(session);
        pollers.push(spawn_poll_loop(handle.clone(), &config));
        handles.push(handle);
    }

    let runs = handles.iter().enumerate().map(|(n, handle)| {
        let rng = StdRng::seed_from_u64(args.seed.wrapping_add(n as u64));
        run_actor(n, handle.clone(), rng, args.steps)
    });
    let stats = futures::future::join_all(runs).await;

    for poller in pollers {
        poller.stop().await;
    }

    let canonical = store.fetch(&key)?;
    println!("{} at version {}", key, canonical.version);
    let mut diverged = 0;
    for (n, (handle, stats)) in handles.iter().zip(stats).enumerate() {
        handle.poll_remote().await?;
        let view = handle.view();
        let in_sync = view.snapshot == canonical.timeline_data;
        if !in_sync {
            diverged += 1;
        }
        println!(
            "actor-{n}: version {} applied {} conflicts {} failed {} in_sync {}",
            view.version, stats.applied, stats.conflicts, stats.failed, in_sync
        );
    }

    if diverged > 0 {
        anyhow::bail!("{diverged} sessions did not converge");
    }
    Ok(())
}

#[derive(Debug, Default)]
struct ActorStats {
    applied: usize,
    conflicts: usize,
    failed: usize,
}

async fn run_actor(n: usize, handle: SessionHandle, mut rng: StdRng, steps: usize) -> ActorStats {
    let mut stats = ActorStats::default();
    for _ in 0..steps {
        let result = match rng.gen_range(0..10) {
            0 => handle.undo().await,
            1 => handle.redo().await,
            2 => handle.poll_remote().await.map(|_| EditOutcome::NoChange),
            _ => {
                let (desired, label) = mutate(&handle.view().snapshot, &mut rng);
                handle.edit(desired, label).await
            }
        };

        match result {
            Ok(EditOutcome::Applied { .. }) => stats.applied += 1,
            Ok(EditOutcome::Conflict { server_version }) => {
                stats.conflicts += 1;
                info!("actor-{n} lost a race to version {}, reloading", server_version);
                if let Err(err) = handle.resolve(Resolution::Reload).await {
                    warn!("actor-{n} reload failed: {}", err);
                    stats.failed += 1;
                }
            }
            Ok(_) => {}
            Err(SessionError::Shutdown) => break,
            Err(err) => {
                warn!("actor-{n}: {}", err);
                stats.failed += 1;
            }
        }

        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..20))).await;
    }
    stats
}

fn starting_timeline() -> TimelineSnapshot {
    TimelineSnapshot::new()
        .with_layer(
            Layer::new("video")
                .with_name("Video")
                .with_clip(Clip::new("intro", 0, 4000).with_name("Intro"))
                .with_clip(Clip::new("main", 4000, 20000).with_name("Main")),
        )
        .with_track(
            AudioTrack::new("music")
                .with_name("Music")
                .with_clip(Clip::new("score", 0, 24000)),
        )
        .with_marker(Marker::new("start", 0, "Start"))
        .with_duration(24000)
}

/// A random user-sized change to `current`.
fn mutate(current: &TimelineSnapshot, rng: &mut StdRng) -> (TimelineSnapshot, &'static str) {
    let mut next = current.clone();
    let lanes = next.lanes();
    let busy = |snapshot: &TimelineSnapshot, min: usize| {
        lanes
            .iter()
            .find(|l| snapshot.lane_clips(l).is_some_and(|clips| clips.len() >= min))
            .cloned()
    };

    let label = match rng.gen_range(0..5) {
        0 if !lanes.is_empty() => {
            let lane = &lanes[rng.gen_range(0..lanes.len())];
            if let Some(clips) = next.lane_clips_mut(lane) {
                let start = clips.last().map(Clip::end_ms).unwrap_or(0);
                clips.push_back(Clip::new(ClipId::new(), start, rng.gen_range(500..5000)));
            }
            "add clip"
        }
        1 => {
            if let Some(clips) = busy(&next, 1).and_then(|lane| next.lane_clips_mut(&lane)) {
                let mut clip = clips.remove(rng.gen_range(0..clips.len()));
                clip.start_ms = rng.gen_range(0..30_000);
                clips.insert(rng.gen_range(0..=clips.len()), clip);
            }
            "move clip"
        }
        2 => {
            if let Some(clips) = busy(&next, 2).and_then(|lane| next.lane_clips_mut(&lane)) {
                clips.remove(rng.gen_range(0..clips.len()));
            }
            "delete clip"
        }
        3 => {
            let time = rng.gen_range(0..next.duration_ms.max(1));
            let marker = Marker::new(format!("m{time}"), time, "cue");
            next.markers.insert(MarkerId::from(format!("m{time}")), marker);
            "add marker"
        }
        _ => {
            next.duration_ms = next.content_end_ms().max(rng.gen_range(10_000..40_000));
            "set duration"
        }
    };
    (next, label)
}
