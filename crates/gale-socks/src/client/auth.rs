use bytes::BytesMut;
use snafu::ensure;
use tokio::net::TcpStream;

use crate::{
	AuthFailureSnafu, GeneralFailureSnafu, Result,
	client::handshake::{recv_message, send_message},
	proto::{
		AuthMethod, CredentialTooLongSnafu, MAX_CREDENTIAL_LEN, UserAuthRequest,
		UserAuthRequestCodec, UserAuthResponseCodec, UserAuthStatus,
	},
};

/// Authentication methods a client offers in its greeting.
///
/// At most two entries: `None` and/or `User`. The greeting advertises `None`
/// first when both are present.
#[derive(Debug, Clone, Default)]
pub struct AuthOptions {
	none: bool,
	user: Option<UserAuthRequest>,
}

impl AuthOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Shorthand for the common anonymous setup.
	pub fn none() -> Self {
		Self::new().with_none()
	}

	pub fn with_none(mut self) -> Self {
		self.none = true;
		self
	}

	/// Adds RFC 1929 credentials. Either value longer than 255 bytes is
	/// rejected, the one-octet length fields cannot carry more.
	pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
		let username = username.into();
		let password = password.into();
		if username.len() > MAX_CREDENTIAL_LEN || password.len() > MAX_CREDENTIAL_LEN {
			return Err(CredentialTooLongSnafu {
				max: MAX_CREDENTIAL_LEN,
			}
			.build()
			.into());
		}
		self.user = Some(UserAuthRequest { username, password });
		Ok(self)
	}

	/// Methods in the order they are advertised.
	pub fn methods(&self) -> Vec<AuthMethod> {
		let mut methods = Vec::with_capacity(2);
		if self.none {
			methods.push(AuthMethod::None);
		}
		if self.user.is_some() {
			methods.push(AuthMethod::User);
		}
		methods
	}

	pub(crate) fn user(&self) -> Option<&UserAuthRequest> {
		self.user.as_ref()
	}
}

/// Client side of the RFC 1929 subnegotiation, run after the proxy selected
/// the `User` method.
pub(crate) async fn run_user_auth(
	stream: &mut TcpStream,
	auth_options: &AuthOptions,
	buf: &mut BytesMut,
) -> Result<()> {
	let request = auth_options.user().ok_or_else(|| GeneralFailureSnafu.build())?;
	send_message(stream, UserAuthRequestCodec, request).await?;
	let response = recv_message(stream, UserAuthResponseCodec, buf).await?;
	ensure!(response.status == UserAuthStatus::Success, AuthFailureSnafu);
	Ok(())
}

#[cfg(test)]
mod test {
	use super::AuthOptions;
	use crate::proto::AuthMethod;

	#[test]
	fn advertises_none_first() -> eyre::Result<()> {
		let options = AuthOptions::new().with_user("user", "pass")?.with_none();
		assert_eq!(options.methods(), vec![AuthMethod::None, AuthMethod::User]);
		Ok(())
	}

	#[test]
	fn empty_options_advertise_nothing() {
		assert!(AuthOptions::new().methods().is_empty());
	}

	#[test]
	fn rejects_oversize_credentials() {
		assert!(AuthOptions::new().with_user("u".repeat(256), "p").is_err());
		assert!(AuthOptions::new().with_user("u", "p".repeat(256)).is_err());
		assert!(AuthOptions::new().with_user("u".repeat(255), "p".repeat(255)).is_ok());
	}
}
