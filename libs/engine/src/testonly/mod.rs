//! Test-only utilities.
use std::sync::Arc;

use pala_roles::validator::testonly::Setup;
use zksync_concurrency::ctx;

use crate::{EngineManager, EngineManagerRunner, PipelinedFinality};

pub mod in_memory;

/// Test-only engine manager backed by in-memory storage.
pub struct TestEngineManager {
    /// The engine manager.
    pub engine: Arc<EngineManager>,
    /// Runner of the engine manager background tasks.
    pub runner: EngineManagerRunner,
    /// The in-memory engine representing the persistent store.
    pub im_engine: in_memory::Engine,
}

impl TestEngineManager {
    /// Constructs a new in-memory engine manager with the default
    /// finality rule.
    pub async fn new(ctx: &ctx::Ctx, setup: &Setup) -> Self {
        Self::new_with_im(ctx, in_memory::Engine::new(setup)).await
    }

    /// Constructs an engine manager on top of the given in-memory engine.
    /// Lets tests pre-seed persisted state or customize payload behavior.
    pub async fn new_with_im(ctx: &ctx::Ctx, im_engine: in_memory::Engine) -> Self {
        let (engine, runner) = EngineManager::new(
            ctx,
            Box::new(im_engine.clone()),
            Box::new(PipelinedFinality),
        )
        .await
        .unwrap();
        Self {
            engine,
            runner,
            im_engine,
        }
    }
}
