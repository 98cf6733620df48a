//! WhatsApp Business messaging — templates under platform review, one-to-one
//! messages, and template broadcasts with delivery receipts.

pub mod broadcast;
pub mod messages;
pub mod sender;
pub mod templates;

pub use broadcast::{Broadcast, BroadcastService, BroadcastStatus, DeliveryReceipt, NewBroadcast};
pub use messages::{MessageService, MessageStatus, SendMessage, WhatsAppMessage};
pub use sender::{SimulatedSender, WhatsAppProvider, WhatsAppSender};
pub use templates::{TemplateStore, WhatsAppTemplate};
