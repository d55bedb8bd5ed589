pub mod bank_page;
pub mod central_bank;
pub mod util;

pub use bank_page::BankPageAdapter;
pub use central_bank::CentralBankFeedAdapter;
