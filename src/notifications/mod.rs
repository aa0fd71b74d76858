mod alert;
mod classify;
mod dispatcher;

pub use alert::{Alert, AlertController};
pub use classify::{classify, EventCategory};
pub use dispatcher::{
    spawn_dispatch_loop, DispatchReport, HookId, NotificationDispatcher, RefreshHook,
};
