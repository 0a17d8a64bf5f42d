//! `mavlink_message!` generates a message struct plus its descriptor
//!
//! ```
//! use vayu_wire::mavlink_message;
//! use vayu_wire::message::FixedString;
//!
//! mavlink_message! {
//!     /// Example message
//!     pub struct MessageSample(250) {
//!         time_boot_ms: u32,
//!         state: u64 as u8,
//!         label: FixedString<16>,
//!         mavtype: u8 => "type",
//!     }
//!     extensions {
//!         extra: f32,
//!     }
//! }
//! ```
//!
//! Field syntax:
//! - `name: T` for primitives, `[T; N]` arrays and `FixedString<N>` strings
//! - `name: u64 as W` for enums carried as `u64` and written with width `W`
//! - `=> "proto"` overrides the protocol-side field name

/// Define a MAVLink message type
#[macro_export]
macro_rules! mavlink_message {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($id:expr) {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty $(as $wire:ty)? $(=> $proto:literal)?
            ),* $(,)?
        }
        $(
            extensions {
                $(
                    $(#[$xmeta:meta])*
                    $xfield:ident : $xty:ty $(as $xwire:ty)? $(=> $xproto:literal)?
                ),* $(,)?
            }
        )?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
            $($(
                $(#[$xmeta])*
                pub $xfield: $xty,
            )*)?
        }

        impl $crate::message::MessageType for $name {
            fn describe() -> &'static $crate::message::MessageDescriptor {
                static DESCRIPTOR: $crate::message::MessageDescriptor =
                    $crate::message::MessageDescriptor {
                        name: ::std::stringify!($name),
                        id: $id,
                        fields: &[
                            $(
                                $crate::message::FieldDescriptor {
                                    name: ::std::stringify!($field),
                                    protocol_name: $crate::__mav_proto_name!($($proto)?),
                                    kind: $crate::__mav_field_kind!($ty $(, $wire)?),
                                    extension: false,
                                },
                            )*
                            $($(
                                $crate::message::FieldDescriptor {
                                    name: ::std::stringify!($xfield),
                                    protocol_name: $crate::__mav_proto_name!($($xproto)?),
                                    kind: $crate::__mav_field_kind!($xty $(, $xwire)?),
                                    extension: true,
                                },
                            )*)?
                        ],
                    };
                &DESCRIPTOR
            }

            fn from_values(
                values: ::std::vec::Vec<$crate::message::Value>,
            ) -> $crate::Result<Self> {
                #[allow(unused_mut, unused_variables)]
                let mut values = values.into_iter();
                Ok(Self {
                    $(
                        $field: $crate::message::take_field(
                            &mut values,
                            ::std::stringify!($field),
                        )?,
                    )*
                    $($(
                        $xfield: $crate::message::take_field(
                            &mut values,
                            ::std::stringify!($xfield),
                        )?,
                    )*)?
                })
            }
        }

        impl $crate::message::Message for $name {
            fn descriptor(&self) -> &'static $crate::message::MessageDescriptor {
                <Self as $crate::message::MessageType>::describe()
            }

            fn values(&self) -> ::std::vec::Vec<$crate::message::Value> {
                ::std::vec![
                    $($crate::message::WireField::to_value(&self.$field),)*
                    $($($crate::message::WireField::to_value(&self.$xfield),)*)?
                ]
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __mav_proto_name {
    () => {
        ::std::option::Option::None
    };
    ($proto:literal) => {
        ::std::option::Option::Some($proto)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __mav_field_kind {
    ($ty:ty) => {
        <$ty as $crate::message::WireField>::KIND
    };
    ($ty:ty, $wire:ty) => {
        $crate::message::FieldKind::Enum {
            logical: <$ty as $crate::message::WireScalar>::TYPE,
            wire: <$wire as $crate::message::WireScalar>::TYPE,
        }
    };
}
