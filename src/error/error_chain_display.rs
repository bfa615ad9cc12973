/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
	error::Error as StdError,
	fmt::{self, Display},
};

/// Wrapper around a type implementing [`std::error::Error`]
/// that renders the whole source chain.
///
/// The alternate form (`{:#}`) prints every cause on its own line:
///
/// Fetch cycle for a@example.com failed
///
/// Caused by:
///   1: Failed to connect to the mail server
///   2: connection refused
///
/// The regular form (`{}`) joins them on a single line with `: `,
/// which is what ends up in [`SyncConfig::last_error`](`crate::sync::SyncConfig::last_error`).
pub struct ErrorChainDisplay<'a>(pub &'a dyn StdError);

impl Display for ErrorChainDisplay<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut current_err = self.0;
		let mut counter = 0;
		write!(f, "{current_err}")?;

		while let Some(source) = StdError::source(current_err) {
			current_err = source;
			counter += 1;

			if f.alternate() {
				if counter == 1 {
					write!(f, "\n\nCaused by:")?;
				}

				write!(f, "\n\t{counter}: {current_err}")?;
			} else {
				write!(f, ": {current_err}")?;
			}
		}

		Ok(())
	}
}
