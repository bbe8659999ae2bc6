use std::sync::Arc;

use tether_core::approval::ApprovalCoordinator;
use tether_core::config::Config;
use tether_core::session::SessionStore;
use tether_core::turn::TurnEngine;

use crate::telegram::TelegramClient;

/// Shared immutable state for every handler.
pub(crate) struct BotContext {
    client: TelegramClient,
    config: Config,
    engine: TurnEngine,
}

impl BotContext {
    pub(crate) fn new(client: TelegramClient, config: Config, engine: TurnEngine) -> Self {
        Self {
            client,
            config,
            engine,
        }
    }

    pub(crate) fn client(&self) -> &TelegramClient {
        &self.client
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    pub(crate) fn sessions(&self) -> &Arc<SessionStore> {
        self.engine.sessions()
    }

    pub(crate) fn approvals(&self) -> &Arc<ApprovalCoordinator> {
        self.engine.approvals()
    }
}
