#[macro_export]
macro_rules! Err {
	($($args:tt)*) => {
		Err($crate::err!($($args)*))
	};
}

#[macro_export]
macro_rules! err {
	($variant:ident($($args:tt),+)) => {
		$crate::error::Error::$variant(std::format!($($args),+).into())
	};

	($string:literal$(,)? $($args:tt),*) => {
		$crate::error::Error::Err(std::format!($string, $($args),*).into())
	};
}
