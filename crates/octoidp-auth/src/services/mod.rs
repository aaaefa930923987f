//! Collaborators of the protocol engine.

pub mod claims_filter;
pub mod claims_provider;
pub mod consent;
pub mod custom_grant;
pub mod user;

pub use claims_filter::{
    AggregateClaimsFilter, ClaimsFilter, ExcludeClaimTypesFilter, RenameClaimTypesFilter,
};
pub use claims_provider::{ClaimsProvider, DefaultClaimsProvider};
pub use consent::ConsentService;
pub use custom_grant::{
    CustomGrantRequest, CustomGrantResult, CustomGrantValidator, CustomGrantValidators,
};
pub use user::{
    AuthenticateResult, CachingUserService, InMemoryUser, InMemoryUserService,
    LocalAuthenticationContext, PASSWORD_AMR, ProfileDataCaller, ProfileDataRequest, UserService,
};
