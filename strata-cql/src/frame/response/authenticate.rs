use crate::frame::frame_errors::CqlResponseParseError;
use crate::frame::types;

/// Server demands authentication with the named authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticate {
    pub authenticator_name: String,
}

impl Authenticate {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlResponseParseError> {
        let authenticator_name = types::read_string(buf)
            .map_err(CqlResponseParseError::CqlAuthenticateParseError)?
            .to_string();

        Ok(Authenticate { authenticator_name })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    pub success_message: Option<Vec<u8>>,
}

impl AuthSuccess {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlResponseParseError> {
        let success_message = types::read_bytes_opt(buf)
            .map_err(CqlResponseParseError::CqlAuthSuccessParseError)?
            .map(ToOwned::to_owned);

        Ok(AuthSuccess { success_message })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub authenticate_message: Option<Vec<u8>>,
}

impl AuthChallenge {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlResponseParseError> {
        let authenticate_message = types::read_bytes_opt(buf)
            .map_err(CqlResponseParseError::CqlAuthChallengeParseError)?
            .map(ToOwned::to_owned);

        Ok(AuthChallenge {
            authenticate_message,
        })
    }
}
