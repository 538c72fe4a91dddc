//! Classification of reassembled payload unit groups.
//!
//! Given the packets of one payload unit, decides between PSI and PES by
//! PID and payload shape, decodes accordingly, and emits the demuxed data
//! items the caller receives from
//! [`Demuxer::next_data`](crate::Demuxer::next_data).

use crate::dvb::{Bat, Eit, Nit, Sdt, Tdt, Tot};
use crate::pes::{parse_pes, Pes};
use crate::psi::{parse_sections, Cat, Pat, Pmt, PsiPayload};
use crate::{Packet, ProgramMap, Result};

/// PIDs that always carry PSI sections: PAT, NIT, SDT/BAT, EIT, TDT/TOT
/// and the DVB measurement PIDs.
const PSI_PIDS: [u16; 7] = [0x0000, 0x0010, 0x0011, 0x0012, 0x0014, 0x001e, 0x001f];

const PID_CAT: u16 = 0x0001;

/// Decoded content of one demuxed item.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// Program association table.
    Pat(Pat),
    /// Program map table.
    Pmt(Pmt),
    /// Conditional access table.
    Cat(Cat),
    /// Network information table.
    Nit(Nit),
    /// Bouquet association table.
    Bat(Bat),
    /// Service description table.
    Sdt(Sdt),
    /// Event information table.
    Eit(Eit),
    /// Time and date table.
    Tdt(Tdt),
    /// Time offset table.
    Tot(Tot),
    /// Packetized elementary stream payload.
    Pes(Pes),
}

/// One demuxed item handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxerData {
    /// PID the payload unit arrived on.
    pub pid: u16,
    /// Packet that started the payload unit.
    pub first_packet: Packet,
    /// Decoded content.
    pub data: Data,
}

fn is_pes(payload: &[u8]) -> bool {
    payload.len() >= 3 && payload[0] == 0 && payload[1] == 0 && payload[2] == 1
}

fn psi_items(pid: u16, first_packet: &Packet, payload: &[u8]) -> Result<Vec<DemuxerData>> {
    let sections = parse_sections(payload)?;
    Ok(sections
        .into_iter()
        .map(|section| DemuxerData {
            pid,
            first_packet: first_packet.clone(),
            data: match section.payload {
                PsiPayload::Pat(pat) => Data::Pat(pat),
                PsiPayload::Pmt(pmt) => Data::Pmt(pmt),
                PsiPayload::Cat(cat) => Data::Cat(cat),
                PsiPayload::Nit(nit) => Data::Nit(nit),
                PsiPayload::Bat(bat) => Data::Bat(bat),
                PsiPayload::Sdt(sdt) => Data::Sdt(sdt),
                PsiPayload::Eit(eit) => Data::Eit(eit),
                PsiPayload::Tdt(tdt) => Data::Tdt(tdt),
                PsiPayload::Tot(tot) => Data::Tot(tot),
            },
        })
        .collect())
}

/// Decodes one payload unit group into demuxed items.
///
/// Unclassifiable groups decode to nothing rather than an error; a
/// spurious PID must not abort the stream.
pub(crate) fn parse_data(packets: &[Packet], program_map: &ProgramMap) -> Result<Vec<DemuxerData>> {
    let first_packet = match packets.first() {
        Some(packet) => packet,
        None => return Ok(Vec::new()),
    };
    let pid = first_packet.header.pid();
    let mut payload = Vec::new();
    for packet in packets {
        if let Some(bytes) = &packet.payload {
            payload.extend_from_slice(bytes);
        }
    }

    if PSI_PIDS.contains(&pid) || program_map.exists(pid) {
        psi_items(pid, first_packet, &payload)
    } else if is_pes(&payload) {
        Ok(vec![DemuxerData {
            pid,
            first_packet: first_packet.clone(),
            data: Data::Pes(parse_pes(&payload)?),
        }])
    } else if pid == PID_CAT {
        psi_items(pid, first_packet, &payload)
    } else {
        Ok(Vec::new())
    }
}
