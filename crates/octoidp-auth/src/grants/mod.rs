//! Grant processing: what happens after a request has been validated.

pub mod authorize;
pub mod token;
pub mod userinfo;

pub use authorize::{
    AUTHORIZE_PATH, AuthorizeInteraction, AuthorizeResponse, AuthorizeResponseGenerator,
    InteractionOutcome, error_parameters, redirect_url,
};
pub use token::{TokenResponse, TokenResponseGenerator};
pub use userinfo::UserInfoResponseGenerator;
