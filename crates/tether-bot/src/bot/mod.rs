mod context;

pub(crate) use context::BotContext;
