pub mod tenant;

pub use tenant::{COMPANY_ID_HEADER, TENANT_ID_HEADER, USER_ID_HEADER};
