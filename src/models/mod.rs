mod cursor;
mod question;
mod subscription;

pub use cursor::{DueSite, SiteCursor, UpdateStatus};
pub use question::Question;
pub use subscription::{Subscription, TagFilter};
