use std::sync::Arc;

use anyhow::Result;

use threadmine_ai::{AiConfig, OpenRouterClient};
use threadmine_core::{ForumSource, Synthesizer};
use threadmine_reddit::{RedditClient, RedditConfig};

use crate::SessionFactory;

/// Production factory: Reddit and OpenRouter clients configured from the
/// environment, built fresh for each run.
#[derive(Debug, Default)]
pub struct EnvSessions;

impl SessionFactory for EnvSessions {
    fn forum(&self) -> Result<Arc<dyn ForumSource>> {
        let client = RedditClient::new(RedditConfig::from_env())?;
        Ok(Arc::new(client))
    }

    fn synthesizer(&self) -> Result<Arc<dyn Synthesizer>> {
        let config = AiConfig::from_env()?;
        let client = OpenRouterClient::new(config)?;
        Ok(Arc::new(client))
    }
}
