//! Pure pipeline transformations that operate on document data.
//!
//! Modules under this namespace must remain free of IO and external side effects
//! so they can be reused across batch orchestrators and test harnesses.

pub mod invoice;
pub mod reconcile;
pub mod table;
pub mod tally;

pub use invoice::{DocumentKind, ExtractionRequest, InvoiceRecord};
pub use reconcile::reconcile;
pub use table::render_csv;
pub use tally::{Voucher, VoucherLine, VoucherOptions, build_vouchers, render_tally_xml};
