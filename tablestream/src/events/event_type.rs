use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

/// Event kinds carried in the event header's tag byte.
///
/// Tag values are stable across stream versions. The `...2` kinds are the
/// wide (16-bit length) packed variants of their narrow counterparts and
/// only ever appear inside packed streams.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum EventType {
    /// 0 is reserved as illegal. A block of zeros decodes to this tag and
    /// must be rejected explicitly.
    BadEvent = 0,

    /// 生产者上报的致命错误，终止本次加载
    ErrMsg = 1,
    /// 流的唯一正常终结符
    EndStream = 2,
    /// 目标库的远端路径（加载器可能用命令行覆盖）
    RemotePath = 3,
    /// 声明 schema 文件与 schema spec
    UseSchema = 4,
    NewTable = 5,
    NewColumn = 6,
    /// 结构声明结束，打开所有游标
    OpenStream = 7,
    CellDefault = 8,
    CellData = 9,
    NextRow = 10,
    /// 跳过 n 行，逐行提交
    MoveAhead = 11,

    ErrMsg2 = 12,
    RemotePath2 = 13,
    UseSchema2 = 14,
    NewTable2 = 15,
    CellDefault2 = 16,
    CellData2 = 17,
    /// 空缺省值。packed 数据事件无法表达 0 字节，因此单列一个事件
    EmptyDefault = 18,

    SoftwareName = 19,
    DbMetadataNode = 20,
    TblMetadataNode = 21,
    ColMetadataNode = 22,
    DbMetadataNode2 = 23,
    TblMetadataNode2 = 24,
    ColMetadataNode2 = 25,
    AddMbrDb = 26,
    AddMbrTbl = 27,
    LogMsg = 28,
    ProgMsg = 29,

    DbMetadataNodeAttr = 30,
    TblMetadataNodeAttr = 31,
    ColMetadataNodeAttr = 32,
    DbMetadataNodeAttr2 = 33,
    TblMetadataNodeAttr2 = 34,
    ColMetadataNodeAttr2 = 35,
}

impl EventType {
    /// Wide packed variants never appear in an unpacked stream.
    pub fn is_packed_only(&self) -> bool {
        matches!(
            self,
            EventType::ErrMsg2
                | EventType::RemotePath2
                | EventType::UseSchema2
                | EventType::NewTable2
                | EventType::CellDefault2
                | EventType::CellData2
                | EventType::DbMetadataNode2
                | EventType::TblMetadataNode2
                | EventType::ColMetadataNode2
                | EventType::DbMetadataNodeAttr2
                | EventType::TblMetadataNodeAttr2
                | EventType::ColMetadataNodeAttr2
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_values_are_stable() {
        assert_eq!(u8::from(EventType::BadEvent), 0);
        assert_eq!(u8::from(EventType::ErrMsg), 1);
        assert_eq!(u8::from(EventType::EndStream), 2);
        assert_eq!(u8::from(EventType::MoveAhead), 11);
        assert_eq!(u8::from(EventType::EmptyDefault), 18);
        assert_eq!(u8::from(EventType::ProgMsg), 29);
        assert_eq!(u8::from(EventType::ColMetadataNodeAttr2), 35);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(EventType::try_from(36u8).is_err());
        assert!(EventType::try_from(0xFFu8).is_err());
    }

    #[test]
    fn packed_only_variants() {
        assert!(EventType::CellData2.is_packed_only());
        assert!(EventType::DbMetadataNodeAttr2.is_packed_only());
        assert!(!EventType::CellData.is_packed_only());
        assert!(!EventType::LogMsg.is_packed_only());
    }
}
