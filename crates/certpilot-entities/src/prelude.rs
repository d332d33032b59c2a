pub use super::ca_logs::Entity as CaLogs;
pub use super::certs::Entity as Certs;
pub use super::chains::Entity as Chains;
pub use super::domain_validation_records::Entity as DomainValidationRecords;
pub use super::orders::Entity as Orders;
pub use super::products::Entity as Products;
pub use super::settings::Entity as Settings;
pub use super::tasks::Entity as Tasks;
pub use super::transactions::Entity as Transactions;
pub use super::users::Entity as Users;
