//! Well-known MAPI property identifiers.
//!
//! A property tag is the 16-bit identifier over a 16-bit value type; the
//! identifiers below are the fixed ones this crate reads itself. Callers can
//! use them with the generic entry accessors, and anything not listed here
//! is still reachable by its numeric identifier.

/// `PidTagMessageClass`
pub const MESSAGE_CLASS: u32 = 0x001A;
/// `PidTagSubject`
pub const SUBJECT: u32 = 0x0037;
/// `PidTagClientSubmitTime`
pub const CLIENT_SUBMIT_TIME: u32 = 0x0039;
/// `PidTagSentRepresentingName`
pub const SENT_REPRESENTING_NAME: u32 = 0x0042;
/// `PidTagSenderName`
pub const SENDER_NAME: u32 = 0x0C1A;
/// `PidTagRecipientType`
pub const RECIPIENT_TYPE: u32 = 0x0C15;
/// `PidTagMessageDeliveryTime`
pub const MESSAGE_DELIVERY_TIME: u32 = 0x0E06;
/// `PidTagMessageFlags`
pub const MESSAGE_FLAGS: u32 = 0x0E07;
/// `PidTagMessageSize`
pub const MESSAGE_SIZE: u32 = 0x0E08;
/// `PidTagAttachSize`
pub const ATTACH_SIZE: u32 = 0x0E20;
/// `PidTagRecordKey`
pub const RECORD_KEY: u32 = 0x0FF9;
/// `PidTagBody`
pub const BODY: u32 = 0x1000;
/// `PidTagRtfCompressed`
pub const RTF_COMPRESSED: u32 = 0x1009;
/// `PidTagBodyHtml`
pub const BODY_HTML: u32 = 0x1013;
/// `PidTagDisplayName`
pub const DISPLAY_NAME: u32 = 0x3001;
/// `PidTagAddressType`
pub const ADDRESS_TYPE: u32 = 0x3002;
/// `PidTagEmailAddress`
pub const EMAIL_ADDRESS: u32 = 0x3003;
/// `PidTagCreationTime`
pub const CREATION_TIME: u32 = 0x3007;
/// `PidTagLastModificationTime`
pub const LAST_MODIFICATION_TIME: u32 = 0x3008;
/// `PidTagContentCount`
pub const CONTENT_COUNT: u32 = 0x3602;
/// `PidTagContentUnreadCount`
pub const CONTENT_UNREAD_COUNT: u32 = 0x3603;
/// `PidTagSubfolders`
pub const SUBFOLDERS: u32 = 0x360A;
/// `PidTagContainerClass`
pub const CONTAINER_CLASS: u32 = 0x3613;
/// `PidTagAttachDataBinary` / `PidTagAttachDataObject`
pub const ATTACH_DATA: u32 = 0x3701;
/// `PidTagAttachFilename`
pub const ATTACH_FILENAME: u32 = 0x3704;
/// `PidTagAttachMethod`
pub const ATTACH_METHOD: u32 = 0x3705;
/// `PidTagAttachLongFilename`
pub const ATTACH_LONG_FILENAME: u32 = 0x3707;
/// `PidTagAttachMimeTag`
pub const ATTACH_MIME_TAG: u32 = 0x370E;
/// `PidTagInternetCodepage`
pub const INTERNET_CODEPAGE: u32 = 0x3FDE;
/// `PidTagMessageCodepage`
pub const MESSAGE_CODEPAGE: u32 = 0x3FFD;

/// `PidTagRecipientType` values.
pub mod recipient_type {
    pub const ORIGINATOR: i32 = 0;
    pub const TO: i32 = 1;
    pub const CC: i32 = 2;
    pub const BCC: i32 = 3;
}
