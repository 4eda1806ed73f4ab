// Protocol config parsers and client share links

pub mod cert;
pub mod links;
pub mod nginx;
pub mod xray;

pub use cert::CertificateInfo;
pub use nginx::{NginxConfigInfo, NginxConfigParser};
pub use xray::XrayConfigInfo;

/// Append unless already present; keeps first-seen order.
pub(crate) fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}
