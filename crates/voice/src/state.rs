//! Leg-Registry – In-Memory Zustand aller aktiven Call-Legs
//!
//! Verwaltet pro Leg:
//! - das [`CallLeg`] selbst (Jitter Buffer, Empfangs-/Sendezustand)
//! - den RTP-Endpunkt der Gegenstelle
//! - die SSRC der Gegenstelle, sobald das erste Paket ankam
//! - den Zeitpunkt des letzten Pakets
//!
//! Thread-safe durch DashMap (kein globaler Lock). Der Empfangspfad loest
//! Datagramme ueber den Endpunkt-Index auf, RTCP zusaetzlich ueber die SSRC.

use crate::leg::CallLeg;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use voxbridge_core::LegId;

/// Timeout fuer inaktive Legs (30 Sekunden ohne Paket)
pub const LEG_TIMEOUT: Duration = Duration::from_secs(30);

struct Eintrag {
    leg: Arc<CallLeg>,
    letztes_paket: Mutex<Instant>,
}

/// Zentrale Registry aller Call-Legs
///
/// `Clone` teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct LegRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    legs: DashMap<LegId, Eintrag>,
    /// RTP-Endpunkt -> Leg
    endpunkt_index: DashMap<SocketAddr, LegId>,
    /// SSRC der Gegenstelle -> Leg
    ssrc_index: DashMap<u32, LegId>,
}

impl LegRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert ein Leg unter seinem RTP-Endpunkt
    ///
    /// Ein bereits registriertes Leg mit demselben Endpunkt wird ersetzt und
    /// beendet.
    pub fn registrieren(&self, leg: Arc<CallLeg>) {
        let id = leg.id();
        let remote = leg.remote();
        if let Some(alt) = self.inner.endpunkt_index.insert(remote, id) {
            if alt != id {
                tracing::warn!(leg = %alt, endpunkt = %remote, "Endpunkt neu vergeben, altes Leg wird entfernt");
                if let Some((_, eintrag)) = self.inner.legs.remove(&alt) {
                    self.ssrc_vergessen(&eintrag.leg);
                    eintrag.leg.beenden();
                }
            }
        }
        self.inner.legs.insert(
            id,
            Eintrag {
                leg,
                letztes_paket: Mutex::new(Instant::now()),
            },
        );
        tracing::info!(leg = %id, endpunkt = %remote, "Leg registriert");
    }

    /// Entfernt ein Leg, bereinigt alle Indizes und beendet es
    pub fn entfernen(&self, id: &LegId) -> Option<Arc<CallLeg>> {
        let (_, eintrag) = self.inner.legs.remove(id)?;
        self.inner
            .endpunkt_index
            .remove_if(&eintrag.leg.remote(), |_, v| v == id);
        self.ssrc_vergessen(&eintrag.leg);
        eintrag.leg.beenden();
        tracing::info!(leg = %id, "Leg entfernt");
        Some(eintrag.leg)
    }

    pub fn leg(&self, id: &LegId) -> Option<Arc<CallLeg>> {
        self.inner.legs.get(id).map(|e| e.leg.clone())
    }

    /// Sucht das Leg zu einem RTP-Absender (Hot Path)
    pub fn leg_von_endpunkt(&self, endpunkt: &SocketAddr) -> Option<Arc<CallLeg>> {
        let id = *self.inner.endpunkt_index.get(endpunkt)?;
        self.leg(&id)
    }

    /// Sucht das Leg zu einer SSRC der Gegenstelle
    pub fn leg_von_ssrc(&self, ssrc: u32) -> Option<Arc<CallLeg>> {
        let id = *self.inner.ssrc_index.get(&ssrc)?;
        self.leg(&id)
    }

    /// Verbucht ein Paket: Zeitstempel und SSRC-Index aktualisieren
    pub fn paket_empfangen(&self, id: &LegId, ssrc: u32) {
        if let Some(eintrag) = self.inner.legs.get(id) {
            *eintrag.letztes_paket.lock() = Instant::now();
        }
        match self.inner.ssrc_index.insert(ssrc, *id) {
            Some(alt) if alt == *id => {}
            _ => self.ssrc_index_bereinigen(id, ssrc),
        }
    }

    /// Alle registrierten Legs
    pub fn legs(&self) -> Vec<Arc<CallLeg>> {
        self.inner.legs.iter().map(|e| e.leg.clone()).collect()
    }

    /// Entfernt Legs ohne Paket seit `timeout`
    ///
    /// Gibt die IDs der entfernten Legs zurueck.
    pub fn inaktive_bereinigen(&self, timeout: Duration) -> Vec<LegId> {
        let inaktive: Vec<LegId> = self
            .inner
            .legs
            .iter()
            .filter(|e| e.letztes_paket.lock().elapsed() > timeout)
            .map(|e| *e.key())
            .collect();

        for id in &inaktive {
            self.entfernen(id);
            tracing::warn!(leg = %id, "Inaktives Leg entfernt (Timeout)");
        }
        inaktive
    }

    pub fn anzahl(&self) -> usize {
        self.inner.legs.len()
    }

    pub fn ist_registriert(&self, id: &LegId) -> bool {
        self.inner.legs.contains_key(id)
    }

    /// Nach einem SSRC-Wechsel zeigt nur noch die neue SSRC auf das Leg
    fn ssrc_index_bereinigen(&self, id: &LegId, aktuell: u32) {
        self.inner
            .ssrc_index
            .retain(|ssrc, leg| leg != id || *ssrc == aktuell);
    }

    fn ssrc_vergessen(&self, leg: &CallLeg) {
        let id = leg.id();
        self.inner.ssrc_index.retain(|_, l| *l != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leg::LegConfig;
    use std::net::{IpAddr, Ipv4Addr};
    use voxbridge_core::{EventSink, MediaEvent, MediaFormat};

    struct Stumm;

    impl EventSink for Stumm {
        fn melden(&self, _event: MediaEvent) {}
    }

    fn endpunkt(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn leg(port: u16) -> Arc<CallLeg> {
        let format = MediaFormat::by_payload(0).unwrap();
        Arc::new(CallLeg::neu(LegConfig::neu(format, endpunkt(port)), Arc::new(Stumm)).unwrap())
    }

    #[test]
    fn leg_registrieren_und_abfragen() {
        let registry = LegRegistry::neu();
        let leg = leg(20000);
        registry.registrieren(leg.clone());

        assert!(registry.ist_registriert(&leg.id()));
        assert_eq!(registry.anzahl(), 1);
        assert_eq!(
            registry.leg_von_endpunkt(&endpunkt(20000)).map(|l| l.id()),
            Some(leg.id())
        );
        assert!(registry.leg_von_endpunkt(&endpunkt(20002)).is_none());
    }

    #[test]
    fn entfernen_bereinigt_indizes() {
        let registry = LegRegistry::neu();
        let leg = leg(20010);
        registry.registrieren(leg.clone());
        registry.paket_empfangen(&leg.id(), 0xCAFE);
        assert!(registry.leg_von_ssrc(0xCAFE).is_some());

        registry.entfernen(&leg.id());
        assert!(!registry.ist_registriert(&leg.id()));
        assert!(registry.leg_von_ssrc(0xCAFE).is_none());
        assert!(registry.leg_von_endpunkt(&endpunkt(20010)).is_none());
        assert!(!leg.ist_aktiv());
    }

    #[test]
    fn ssrc_wechsel_ersetzt_index() {
        let registry = LegRegistry::neu();
        let leg = leg(20020);
        registry.registrieren(leg.clone());
        registry.paket_empfangen(&leg.id(), 1);
        registry.paket_empfangen(&leg.id(), 2);

        assert!(registry.leg_von_ssrc(1).is_none());
        assert_eq!(registry.leg_von_ssrc(2).map(|l| l.id()), Some(leg.id()));
    }

    #[test]
    fn gleicher_endpunkt_ersetzt_altes_leg() {
        let registry = LegRegistry::neu();
        let alt = leg(20030);
        let neu = leg(20030);
        registry.registrieren(alt.clone());
        registry.registrieren(neu.clone());

        assert_eq!(registry.anzahl(), 1);
        assert!(!alt.ist_aktiv());
        assert_eq!(
            registry.leg_von_endpunkt(&endpunkt(20030)).map(|l| l.id()),
            Some(neu.id())
        );
    }

    #[test]
    fn inaktive_werden_entfernt() {
        let registry = LegRegistry::neu();
        let leg = leg(20040);
        registry.registrieren(leg.clone());

        assert!(registry.inaktive_bereinigen(Duration::from_secs(60)).is_empty());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.inaktive_bereinigen(Duration::ZERO), vec![leg.id()]);
        assert_eq!(registry.anzahl(), 0);
    }

    #[test]
    fn clone_teilt_inneren_zustand() {
        let a = LegRegistry::neu();
        let b = a.clone();
        let leg = leg(20050);
        a.registrieren(leg.clone());
        assert!(b.ist_registriert(&leg.id()));
    }
}
